use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use machine_qa::analysis::audio::{self, AudioConfig, AudioProbe};
use machine_qa::analysis::visual;
use machine_qa::config;
use machine_qa::loader::{self, TargetConfig};
use machine_qa::notify::MemorySink;
use machine_qa::orchestrator::Orchestrator;
use machine_qa::profile::{self, Profile, ProfileCatalog};
use machine_qa::report::EntryStatus;
use machine_qa::scenario;
use machine_qa::session::Session;
use machine_qa::surface::MockSurface;
use machine_qa::worker::Pacing;

/// Machine QA - automated slot-machine game client testing
#[derive(Parser, Debug)]
#[command(
    name = "machine-qa",
    about = "Automated QA testing of networked slot-machine game clients",
    after_help = "ENVIRONMENT VARIABLES:\n\
        MACHINE_QA_CONFIG_DIR            Base directory for config files\n\
        MACHINE_QA_WEBHOOK_URL           Report webhook endpoint\n\
        MACHINE_QA_SESSION_DIR           Base directory for run artifacts\n\
        MACHINE_QA_SPIN_INTERVAL         Endurance-loop interval (seconds)\n\
        MACHINE_QA_STAGNATION_LIMIT      Unchanged samples before the special flow"
)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the full pipeline against simulated surfaces (dry run)
    Simulate {
        /// Config directory (profiles, backlog, actions)
        #[arg(short, long, env = "MACHINE_QA_CONFIG_DIR")]
        config_dir: Option<PathBuf>,

        /// Number of concurrent workers
        #[arg(short, long, default_value = "2")]
        workers: usize,

        /// Synthesize this many machine identifiers when no backlog exists
        #[arg(short, long, default_value = "4")]
        machines: usize,

        /// Script a frozen balance so the stagnation flow fires
        #[arg(long)]
        stagnate: bool,

        /// Keep the artifact session directory after the run
        #[arg(long, short = 'k')]
        keep: bool,

        /// Output reports as JSON
        #[arg(long)]
        json: bool,
    },

    /// Resolve a machine identifier against the profile catalog
    MatchProfile {
        /// Machine identifier, e.g. "873-JJBX-0004"
        #[arg(short, long)]
        identifier: Option<String>,

        /// Machine URL (for device-id and URL-pattern fallbacks)
        #[arg(short, long, default_value = "")]
        url: String,

        /// Device id override
        #[arg(short, long)]
        device_id: Option<String>,

        /// Explicit machine type override
        #[arg(short = 't', long)]
        machine_type: Option<String>,

        /// Allow device-id/URL fallbacks (endurance runs never do)
        #[arg(long)]
        no_require_identifier: bool,

        /// Config directory holding machine_profiles/
        #[arg(short, long, env = "MACHINE_QA_CONFIG_DIR")]
        config_dir: Option<PathBuf>,
    },

    /// Compare two image files with the reference-image scorer
    Compare {
        /// Reference image path
        #[arg(short, long)]
        reference: PathBuf,

        /// Candidate image path
        #[arg(short, long)]
        candidate: PathBuf,

        /// Pass threshold
        #[arg(short, long, default_value = "0.8")]
        threshold: f64,
    },

    /// Analyze a saved audio-monitor probe dump
    Audio {
        /// Path to a probe JSON file (the monitor dump)
        #[arg(short, long)]
        probe: PathBuf,

        /// Profile directory whose audio config applies
        #[arg(long)]
        profile_dir: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Some(Commands::Simulate {
            config_dir,
            workers,
            machines,
            stagnate,
            keep,
            json,
        }) => {
            let config_dir = config_dir.unwrap_or_else(|| PathBuf::from(config::config_dir()));

            let mut catalog = profile::load_catalog(&config_dir);
            if catalog.is_empty() {
                // No catalog on disk: simulate against a built-in family.
                catalog = ProfileCatalog::from_profiles(vec![Profile::named("JJBX")]);
            }

            let mut backlog = loader::load_backlog(&config_dir);
            if backlog.is_empty() {
                backlog = (1..=machines)
                    .map(|i| format!("873-JJBX-{:04}", i))
                    .collect();
            }
            let lobby: Vec<String> = backlog.clone();

            let actions = loader::load_actions(&config_dir).unwrap_or_default();
            let test_config = scenario::load_test_config(&config_dir);

            let session = Session::with_name("simulate").keep(keep);
            session.init()?;
            let session_dir = session.dir.clone();

            let sink = MemorySink::new();
            let orchestrator = Orchestrator::new(catalog, backlog, Arc::new(sink.clone()))
                .with_actions(actions)
                .with_scenario(test_config.active().cloned())
                .with_session(session)
                .with_pacing(Pacing::fast());

            let targets: Vec<TargetConfig> = (1..=workers)
                .map(|i| TargetConfig {
                    url: format!("http://lobby.simulated/floor-{}", i),
                    identifier: None,
                    machine_type: None,
                    enabled: true,
                })
                .collect();

            let balances = if stagnate {
                vec![100_000]
            } else {
                vec![100_000, 99_000, 98_500, 99_500, 97_000]
            };

            orchestrator.run(targets, move |_| {
                let games: Vec<&str> = lobby.iter().map(String::as_str).collect();
                Box::new(
                    MockSurface::new()
                        .with_lobby_games(games)
                        .with_balances(balances.clone()),
                )
            });

            let reports = sink.reports();
            if json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                println!("Simulation complete: {} reports", reports.len());
                for report in &reports {
                    let entry = match report.entry_status {
                        EntryStatus::Success => "ok",
                        EntryStatus::Failed => "entry failed",
                        EntryStatus::Skipped => "skipped",
                        EntryStatus::Pending => "pending",
                    };
                    println!(
                        "  {} [{}] video={:?} buttons={} errors={}",
                        report.identifier,
                        entry,
                        report.video_status,
                        report.button_tests.len(),
                        report.console_errors.len(),
                    );
                }
                if keep {
                    println!("\nArtifacts: {}", session_dir.display());
                }
            }
        }

        Some(Commands::MatchProfile {
            identifier,
            url,
            device_id,
            machine_type,
            no_require_identifier,
            config_dir,
        }) => {
            let config_dir = config_dir.unwrap_or_else(|| PathBuf::from(config::config_dir()));
            let catalog = profile::load_catalog(&config_dir);
            println!("Catalog: {} profiles", catalog.len());

            if let Some(identifier) = identifier.as_deref() {
                match profile::extract_family_keyword(identifier) {
                    Some(keyword) => println!("Family keyword: {}", keyword),
                    None => println!("Family keyword: (none extractable)"),
                }
            }

            let matched = profile::match_profile(
                &catalog,
                &url,
                identifier.as_deref(),
                device_id.as_deref(),
                machine_type.as_deref(),
                !no_require_identifier,
            );
            match matched {
                Some(profile) => {
                    println!("Matched profile: {}", profile.name);
                    println!("  enabled: {}", profile.enabled);
                    println!("  flows: {}", profile.test_flows.len());
                    for flow in &profile.test_flows {
                        println!("    - {} (enabled: {})", flow.name, flow.enabled);
                    }
                }
                None => println!("No profile matched (machine would be skipped)"),
            }
        }

        Some(Commands::Compare {
            reference,
            candidate,
            threshold,
        }) => {
            let reference_img = image::open(&reference)?;
            let candidate_img = image::open(&candidate)?;
            let (score, detail) = visual::compare_images(&reference_img, &candidate_img);

            println!("Similarity: {:.4} ({})", score, if score >= threshold { "PASS" } else { "FAIL" });
            println!("  ssim:       {:.4}", detail.ssim);
            println!("  histogram:  {:.4}", detail.histogram_correlation);
            println!("  mse:        {:.2}", detail.mse);
            println!("  psnr:       {:.2} dB", detail.psnr);
            if detail.resized {
                println!("  (smaller image upscaled before comparison)");
            }
        }

        Some(Commands::Audio { probe, profile_dir }) => {
            let data = std::fs::read_to_string(&probe)?;
            let probe: AudioProbe = serde_json::from_str(&data)?;

            let config = match profile_dir {
                Some(dir) => audio::load_audio_config(&dir, None),
                None => AudioConfig::default(),
            };

            let analysis = audio::analyze_probe(&probe, &config);
            println!("Audio analysis ({} samples):", analysis.sample_count);
            println!("  has_audio:   {}", analysis.has_audio);
            println!("  avg volume:  {:.1} dB", analysis.avg_volume_db);
            println!("  peak volume: {:.1} dB", analysis.peak_volume_db);
            println!("  clipping:    {} (ratio {:.4})", analysis.clipping_detected, analysis.clipping_ratio);
            println!("  stereo:      {} (correlation {:.4})", analysis.is_stereo, analysis.channel_correlation);
            println!("  noise floor: {:.1} dB", analysis.noise_floor_db);
            if analysis.issues.is_empty() {
                println!("  verdict:     PASS");
            } else {
                println!("  verdict:     FAIL");
                for issue in &analysis.issues {
                    println!("    - {}", issue);
                }
            }
        }

        None => {
            println!("Machine QA - automated slot-machine game client testing");
            println!();
            println!("Usage: machine-qa <COMMAND>");
            println!();
            println!("Commands:");
            println!("  simulate       Run the full pipeline against simulated surfaces");
            println!("  match-profile  Resolve a machine identifier against the catalog");
            println!("  compare        Compare two image files with the similarity scorer");
            println!("  audio          Analyze a saved audio-monitor probe dump");
            println!();
            println!("Run with --help for more information.");
        }
    }

    Ok(())
}
