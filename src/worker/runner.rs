//! The per-worker test lifecycle state machine.
//!
//! One worker owns one automation surface end-to-end and walks each machine
//! it pulls from the shared queue through the same sequence:
//!
//! ```text
//! Idle -> AwaitProfile -> Entering -> Testing -> Endurance -> Reporting
//!      -> Exiting -> (next machine | Terminated)
//! ```
//!
//! Failures stay local: an unmatched or unreachable machine produces a
//! report and the worker moves on. Only queue exhaustion or an external
//! stop terminates the loop.

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use chrono::Utc;
use once_cell::sync::Lazy;
use tracing::{debug, info, warn};

use crate::analysis::audio::{self, AudioConfig};
use crate::analysis::video::{self, VideoThresholds};
use crate::analysis::visual::{self, StageStatus};
use crate::config::{self, EnduranceSettings};
use crate::loader::{ActionTables, TargetConfig};
use crate::notify::ReportSink;
use crate::profile::matcher::match_profile;
use crate::profile::types::{Profile, ProfileCatalog, StepKind, TestFlowStep};
use crate::queue::TaskQueue;
use crate::report::{
    AudioOutcome, BetOutcome, ButtonOutcome, EntryStatus, OutcomeStatus, StageOutcome, TestReport,
    VideoStatus,
};
use crate::scenario::TestScenario;
use crate::session::Session;
use crate::surface::{ConsoleEvent, Locator, UiSurface};
use crate::worker::control::RunControl;
use crate::worker::navigation::{self, Pacing};

/// Flow sequence used when a profile declares no steps of its own.
static DEFAULT_FLOWS: Lazy<Vec<TestFlowStep>> = Lazy::new(|| {
    vec![TestFlowStep::named("video"), TestFlowStep::named("buttons")]
});

/// Lifecycle phase of a worker, tracked for logging and introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AwaitProfile,
    Entering,
    Testing,
    Endurance,
    Reporting,
    Exiting,
    Terminated,
}

/// Shared collaborators handed to every worker of a run.
#[derive(Clone)]
pub struct WorkerContext {
    pub catalog: Arc<ProfileCatalog>,
    pub queue: Arc<TaskQueue>,
    pub sink: Arc<dyn ReportSink>,
    pub control: Arc<RunControl>,
    pub actions: Arc<ActionTables>,
    pub scenario: Option<TestScenario>,
    pub session: Option<Arc<Session>>,
}

/// Per-machine mutable state. Reconstructed from scratch whenever the
/// worker adopts a new identifier, so nothing leaks across machines.
#[derive(Debug)]
struct MachineState {
    identifier: String,
    spin_count: u32,
    stagnation_count: u32,
    last_balance: Option<i64>,
    console_log: Vec<ConsoleEvent>,
    report: TestReport,
}

impl MachineState {
    fn fresh(identifier: &str, machine_type: &str, url: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            spin_count: 0,
            stagnation_count: 0,
            last_balance: None,
            console_log: Vec::new(),
            report: TestReport::new(url, identifier, machine_type),
        }
    }
}

/// One worker: pulls machines from the queue and drives them through the
/// full lifecycle on its exclusively-owned surface.
pub struct Worker {
    id: String,
    target: TargetConfig,
    surface: Box<dyn UiSurface>,
    ctx: WorkerContext,
    pacing: Pacing,
    endurance: EnduranceSettings,
    phase: Phase,
    state: MachineState,
    last_dead_check: Option<Instant>,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        target: TargetConfig,
        surface: Box<dyn UiSurface>,
        ctx: WorkerContext,
    ) -> Self {
        let id = id.into();
        let state = MachineState::fresh("", "unknown", &target.url);
        Self {
            id,
            target,
            surface,
            ctx,
            pacing: Pacing::default(),
            endurance: config::get().endurance.clone(),
            phase: Phase::Idle,
            state,
            last_dead_check: None,
        }
    }

    /// Override pacing (tests and simulations use [`Pacing::fast`]).
    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// Override endurance defaults.
    pub fn with_endurance(mut self, endurance: EnduranceSettings) -> Self {
        self.endurance = endurance;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn set_phase(&mut self, phase: Phase) {
        debug!("[{}] phase {:?} -> {:?}", self.id, self.phase, phase);
        self.phase = phase;
    }

    /// Main loop: pull identifiers until the queue is empty or a stop is
    /// requested between machines.
    pub fn run(&mut self) {
        info!("[{}] starting on {}", self.id, self.target.url);

        // The audio monitor must be in place before first navigation.
        audio::inject_monitor(&mut *self.surface);
        if let Err(err) = self.surface.navigate(&self.target.url) {
            warn!("[{}] initial navigation failed: {}", self.id, err);
        }

        let mut completed = 0usize;
        loop {
            self.set_phase(Phase::Idle);
            if self.ctx.control.stop_requested() {
                info!("[{}] stop requested, terminating", self.id);
                break;
            }

            let Some(code) = self.ctx.queue.take(&self.id) else {
                info!("[{}] queue empty, no more machines", self.id);
                break;
            };
            completed += 1;
            info!(
                "[{}] machine #{}: {} (queue remaining: {})",
                self.id,
                completed,
                code,
                self.ctx.queue.remaining_count()
            );

            self.run_machine(&code);
        }

        self.set_phase(Phase::Terminated);
        info!("[{}] done, {} machines handled", self.id, completed);
    }

    /// Full lifecycle for one machine. Never propagates errors — every
    /// failure path ends in a delivered report and a return.
    fn run_machine(&mut self, code: &str) {
        self.set_phase(Phase::AwaitProfile);
        let profile = match_profile(
            &self.ctx.catalog,
            &self.target.url,
            Some(code),
            None,
            self.target.machine_type.as_deref(),
            true,
        )
        .cloned();

        let Some(profile) = profile else {
            warn!("[{}] no profile for {}, skipping", self.id, code);
            self.state = MachineState::fresh(code, "unknown", &self.target.url);
            self.state.report.entry_status = EntryStatus::Skipped;
            self.state
                .report
                .record_error("match_failure", format!("no profile matched for {}", code));
            self.set_phase(Phase::Reporting);
            self.finish_report();
            return;
        };

        self.set_phase(Phase::Entering);
        self.state = MachineState::fresh(code, &profile.name, &self.target.url);

        if !self.enter_machine(code) {
            self.state.report.entry_status = EntryStatus::Failed;
            self.set_phase(Phase::Reporting);
            self.finish_report();
            return;
        }
        self.state.report.entry_status = EntryStatus::Success;

        self.set_phase(Phase::Testing);
        self.run_flow_steps(&profile);

        self.set_phase(Phase::Endurance);
        if !self.ctx.control.stop_requested() {
            self.endurance_loop(&profile);
        }

        self.set_phase(Phase::Reporting);
        self.finish_report();

        self.set_phase(Phase::Exiting);
        let exit_enabled = self
            .ctx
            .scenario
            .as_ref()
            .map(|s| s.features.enable_exit_flow)
            .unwrap_or(true);
        if exit_enabled {
            if !navigation::exit_to_lobby(&mut *self.surface, &self.pacing) {
                // The next Entering re-verifies and re-navigates anyway.
                warn!("[{}] exit to lobby failed, continuing", self.id);
            }
            thread::sleep(self.pacing.settle_medium);
        }

        info!("[{}] machine {} complete", self.id, code);
    }

    // ------------------------------------------------------------------
    // Entering
    // ------------------------------------------------------------------

    fn enter_machine(&mut self, code: &str) -> bool {
        // Leave any session a previous machine left behind.
        if navigation::is_in_game(&mut *self.surface) {
            info!("[{}] still in a game, exiting to lobby first", self.id);
            navigation::exit_to_lobby(&mut *self.surface, &self.pacing);
            thread::sleep(self.pacing.settle_medium);
        }

        if !navigation::enter_game(&mut *self.surface, code, &self.pacing) {
            self.state
                .report
                .record_error("entry_error", format!("game card not found for {}", code));
            return false;
        }
        thread::sleep(self.pacing.settle_long);

        if !navigation::is_in_game(&mut *self.surface) {
            self.state
                .report
                .record_error("entry_error", format!("could not verify in-game state for {}", code));
            return false;
        }

        // A visible error dialog means the machine rejected the session
        // even though the game chrome rendered.
        if let Some(dialog) = self.surface.locate(&Locator::new(navigation::ERROR_DIALOG)) {
            let text = self.surface.read_text(dialog).unwrap_or_default();
            self.state
                .report
                .record_error("dialog", format!("error dialog on entry: {}", text));
            return false;
        }

        // Console errors observed during load belong to the entry record.
        self.absorb_console();
        true
    }

    fn absorb_console(&mut self) {
        let events = self.surface.drain_console();
        self.state.console_log.extend(events);
    }

    // ------------------------------------------------------------------
    // Testing
    // ------------------------------------------------------------------

    fn run_flow_steps(&mut self, profile: &Profile) {
        let flows: Vec<TestFlowStep> = if profile.test_flows.is_empty() {
            info!("[{}] no declared flows, running default sequence", self.id);
            DEFAULT_FLOWS.clone()
        } else {
            profile.test_flows.clone()
        };

        let whitelist = self
            .ctx
            .scenario
            .as_ref()
            .and_then(|s| s.test_flows.clone());

        for step in &flows {
            if self.ctx.control.stop_requested() {
                break;
            }
            if !step.enabled {
                debug!("[{}] skipping disabled step {}", self.id, step.name);
                continue;
            }
            if let Some(whitelist) = &whitelist {
                if !whitelist.contains(&step.name) {
                    info!("[{}] step {} not in scenario whitelist, skipping", self.id, step.name);
                    continue;
                }
            }

            info!("[{}] running step: {}", self.id, step.name);
            self.run_step(step, profile);
            thread::sleep(self.pacing.settle_short);
        }
    }

    fn run_step(&mut self, step: &TestFlowStep, profile: &Profile) {
        let kind = StepKind::from_name(&step.name);
        match &kind {
            StepKind::Entry => {
                self.run_stage_comparison("entry", step, profile);
                self.run_keyword_actions();
            }
            StepKind::Video => {
                self.test_video(step, profile);
                self.run_stage_comparison("video", step, profile);
            }
            StepKind::Buttons => {
                self.test_buttons(step, profile);
                self.run_stage_comparison("buttons", step, profile);
            }
            StepKind::Betting => {
                self.test_betting(step, profile);
                self.run_stage_comparison("betting", step, profile);
            }
            StepKind::SpecialFeature => {
                self.test_feature_probe(step, "special");
                self.run_stage_comparison("special", step, profile);
            }
            StepKind::GrandFeature => {
                self.test_feature_probe(step, "grand");
                self.run_stage_comparison("grand", step, profile);
            }
            StepKind::Audio => {
                self.test_audio(step, profile);
            }
            StepKind::Unknown(name) => {
                // Never fail on an unknown step; its attached comparison
                // still runs when configured.
                warn!("[{}] unknown test step: {}", self.id, name);
                if step.image_comparison().is_some() {
                    self.run_stage_comparison(&kind.stage_name(), step, profile);
                }
            }
        }
    }

    /// Post-entry click sequence for this machine family, if configured.
    fn run_keyword_actions(&mut self) {
        let action = self
            .ctx
            .actions
            .keyword_action_for(&self.state.identifier)
            .map(|(kw, positions)| (kw.to_string(), positions.to_vec()));
        if let Some((keyword, positions)) = action {
            info!("[{}] running keyword actions for {}: {:?}", self.id, keyword, positions);
            thread::sleep(self.pacing.settle_short);
            navigation::click_positions(&mut *self.surface, &positions, false, &self.pacing);
        }
    }

    fn run_stage_comparison(&mut self, stage: &str, step: &TestFlowStep, profile: &Profile) {
        let Some(comparison_config) = step.image_comparison().cloned() else {
            return;
        };
        let Some(reference_root) = profile.reference_images_dir() else {
            debug!("[{}] profile has no folder, skipping {} comparison", self.id, stage);
            return;
        };

        let comparison =
            visual::compare_stage(&mut *self.surface, stage, &reference_root, &comparison_config);
        let matched = comparison.passed();

        if comparison.status == StageStatus::Failed {
            self.state.report.record_error(
                "image_comparison_failed",
                format!("stage {} image comparison failed", stage),
            );
            if let Some(session) = self.ctx.session.clone() {
                if let Ok(png) = self.surface.screenshot_page() {
                    session.save_failure_screenshot(&self.state.identifier, stage, &png);
                }
            }
        }

        self.state.report.image_comparisons.push(StageOutcome {
            stage: stage.to_string(),
            matched,
            comparison: Some(comparison),
            error: None,
            timestamp: Utc::now(),
        });
    }

    fn test_video(&mut self, step: &TestFlowStep, profile: &Profile) {
        let selector = step
            .config
            .get("selector")
            .and_then(|v| v.as_str())
            .or_else(|| profile.video_detection.get("selector").and_then(|v| v.as_str()))
            .unwrap_or("canvas, video")
            .to_string();
        let thresholds = if step.config.get("threshold").is_some() {
            VideoThresholds::from_config(&step.config)
        } else {
            VideoThresholds::from_config(&profile.video_detection)
        };

        let element = navigation::locate_with_timeout(
            &mut *self.surface,
            &Locator::new(selector),
            self.pacing.scaled(step.timeout.min(5.0)),
            self.pacing.poll,
        );
        let Some(element) = element else {
            self.state.report.video_status = VideoStatus::Error;
            self.state.report.video_message = "video element not found".to_string();
            self.state
                .report
                .record_error("video_error", "video element not found");
            return;
        };

        match self.surface.screenshot_element(element) {
            Ok(png) => {
                let (healthy, message) = video::check_frame(&png, &thresholds);
                if healthy {
                    self.state.report.video_status = VideoStatus::Normal;
                } else {
                    warn!("[{}] video check failed: {}", self.id, message);
                    self.state.report.video_status = VideoStatus::Error;
                    self.state.report.video_message = message.clone();
                    self.state.report.record_error("video_error", message);
                }
            }
            Err(err) => {
                self.state.report.video_status = VideoStatus::Error;
                self.state.report.video_message = format!("screenshot failed: {}", err);
                self.state
                    .report
                    .record_error("video_error", format!("screenshot failed: {}", err));
            }
        }
    }

    fn test_buttons(&mut self, step: &TestFlowStep, profile: &Profile) {
        // Button list: profile config wins, then step config, then defaults.
        let mut button_configs: Vec<(String, String, bool)> = Vec::new();
        if let Some(buttons) = profile.button_test_config.get("buttons").and_then(|v| v.as_array()) {
            for button in buttons {
                let name = button
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Unknown")
                    .to_string();
                let selector = button
                    .get("selector")
                    .and_then(|v| v.as_str())
                    .map(String::from)
                    .unwrap_or_else(|| Locator::button_text(&name).0);
                let highlight = button
                    .get("highlight_check")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                button_configs.push((name, selector, highlight));
            }
        }
        if button_configs.is_empty() {
            let names: Vec<String> = step
                .config
                .get("buttons")
                .and_then(|v| v.as_array())
                .map(|list| {
                    list.iter()
                        .filter_map(|v| v.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_else(|| vec!["SPIN".into(), "BET".into(), "PLAY".into()]);
            let highlight = step
                .config
                .get("check_highlight")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            for name in names {
                let selector = profile
                    .button_locators
                    .get(&name.to_ascii_lowercase())
                    .cloned()
                    .unwrap_or_else(|| Locator::button_text(&name).0);
                button_configs.push((name, selector, highlight));
            }
        }

        let highlight_config = profile
            .button_test_config
            .get("highlight_detection")
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        for (name, selector, check_highlight) in button_configs {
            self.test_one_button(step, &name, &selector, check_highlight, &highlight_config);
        }
    }

    fn test_one_button(
        &mut self,
        step: &TestFlowStep,
        name: &str,
        selector: &str,
        check_highlight: bool,
        highlight_config: &serde_json::Value,
    ) {
        // Selectors may be a comma-separated candidate list; the retry
        // budget re-runs the whole list for flaky UIs.
        let candidates: Vec<&str> = selector.split(',').map(str::trim).collect();
        let attempts = step.retry_count.max(1);

        let mut found: Option<(crate::surface::ElementId, String)> = None;
        'search: for _ in 0..attempts {
            for candidate in &candidates {
                let element = navigation::locate_with_timeout(
                    &mut *self.surface,
                    &Locator::new(*candidate),
                    self.pacing.scaled(2.0),
                    self.pacing.poll,
                );
                if let Some(element) = element {
                    found = Some((element, candidate.to_string()));
                    break 'search;
                }
            }
        }

        let Some((element, used_selector)) = found else {
            self.state.report.button_tests.push(ButtonOutcome {
                button: name.to_string(),
                status: OutcomeStatus::Failed,
                selector: Some(selector.to_string()),
                reason: Some("element not found".to_string()),
                highlight_detected: None,
            });
            return;
        };

        let before_shot = if check_highlight {
            self.surface.screenshot_element(element).ok()
        } else {
            None
        };

        if let Err(err) = self.surface.click(element) {
            warn!("[{}] button {} click failed: {}", self.id, name, err);
            self.state.report.button_tests.push(ButtonOutcome {
                button: name.to_string(),
                status: OutcomeStatus::Error,
                selector: Some(used_selector),
                reason: Some(err.to_string()),
                highlight_detected: None,
            });
            return;
        }
        thread::sleep(self.pacing.settle_short);

        let highlight_detected = if check_highlight {
            Some(self.check_button_highlight(&used_selector, highlight_config, before_shot.as_deref()))
        } else {
            None
        };

        let passed = highlight_detected.unwrap_or(true);
        self.state.report.button_tests.push(ButtonOutcome {
            button: name.to_string(),
            status: if passed { OutcomeStatus::Success } else { OutcomeStatus::Failed },
            selector: Some(used_selector),
            reason: if passed { None } else { Some("no highlight detected".to_string()) },
            highlight_detected,
        });
        if passed {
            info!("[{}] button {} responded", self.id, name);
        } else {
            warn!("[{}] button {} showed no highlight", self.id, name);
        }
    }

    fn check_button_highlight(
        &mut self,
        selector: &str,
        highlight_config: &serde_json::Value,
        before_shot: Option<&[u8]>,
    ) -> bool {
        let method = highlight_config
            .get("method")
            .and_then(|v| v.as_str())
            .unwrap_or("css_class");

        match method {
            "css_class" => {
                let classes = highlight_config
                    .get("css_class")
                    .and_then(|v| v.as_str())
                    .unwrap_or("active, selected, highlight");
                let script = format!(
                    "(() => {{ const el = document.querySelector({:?}); return el ? el.className : ''; }})()",
                    selector
                );
                match self.surface.evaluate(&script) {
                    Ok(serde_json::Value::String(class_name)) => classes
                        .split(',')
                        .map(str::trim)
                        .any(|c| !c.is_empty() && class_name.contains(c)),
                    _ => false,
                }
            }
            "background_color" => {
                let colors = highlight_config
                    .get("background_color")
                    .and_then(|v| v.as_str())
                    .unwrap_or("#ffd700, yellow");
                let script = format!(
                    "(() => {{ const el = document.querySelector({:?}); \
                     return el ? getComputedStyle(el).backgroundColor : ''; }})()",
                    selector
                );
                match self.surface.evaluate(&script) {
                    Ok(serde_json::Value::String(background)) => {
                        let background = background.to_ascii_lowercase();
                        colors
                            .split(',')
                            .map(str::trim)
                            .any(|c| !c.is_empty() && background.contains(&c.to_ascii_lowercase()))
                    }
                    _ => false,
                }
            }
            "screenshot" => {
                let Some(before) = before_shot else { return false };
                let Some(element) = self.surface.locate(&Locator::new(selector)) else {
                    return false;
                };
                match self.surface.screenshot_element(element) {
                    Ok(after) => after != before,
                    Err(_) => false,
                }
            }
            other => {
                warn!("[{}] unknown highlight method: {}", self.id, other);
                false
            }
        }
    }

    fn test_betting(&mut self, step: &TestFlowStep, profile: &Profile) {
        let amounts: Vec<f64> = step
            .config
            .get("bet_amounts")
            .and_then(|v| v.as_array())
            .map(|list| list.iter().filter_map(|v| v.as_f64()).collect())
            .unwrap_or_else(|| vec![10.0, 50.0, 100.0]);
        let bet_locator = profile.button_locators.get("bet").cloned();

        info!("[{}] betting test with amounts {:?}", self.id, amounts);
        for amount in amounts {
            let (success, reason) = match &bet_locator {
                Some(selector) => {
                    let clicked =
                        navigation::safe_click(&mut *self.surface, &Locator::new(selector));
                    (clicked, (!clicked).then(|| "bet button not clickable".to_string()))
                }
                None => (true, Some("no bet locator configured".to_string())),
            };
            self.state.report.bet_results.push(BetOutcome {
                bet_amount: amount,
                success,
                reason,
                timestamp: Utc::now(),
            });
            thread::sleep(self.pacing.settle_short);
        }
    }

    /// Feature probes click the positions the step declares, if any.
    fn test_feature_probe(&mut self, step: &TestFlowStep, label: &str) {
        let positions: Vec<String> = step
            .config
            .get("positions")
            .and_then(|v| v.as_array())
            .map(|list| {
                list.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        if positions.is_empty() {
            info!("[{}] {} probe has no actions configured", self.id, label);
            return;
        }
        navigation::click_positions(&mut *self.surface, &positions, false, &self.pacing);
    }

    fn test_audio(&mut self, step: &TestFlowStep, profile: &Profile) {
        info!("[{}] audio quality check", self.id);

        let mut audio_config = match &profile.folder_path {
            Some(folder) => audio::load_audio_config(
                folder,
                self.ctx.catalog.profiles_dir.as_deref(),
            ),
            None => AudioConfig::default(),
        };
        if let Some(step_override) = step.config.get("audio") {
            let merged = audio::deep_merge(
                serde_json::to_value(&audio_config).unwrap_or(serde_json::Value::Null),
                step_override.clone(),
            );
            if let Ok(config) = serde_json::from_value(merged) {
                audio_config = config;
            }
        }
        if !audio_config.enabled {
            info!("[{}] audio check disabled by config", self.id);
            return;
        }

        // Fresh sampling window for this check.
        let _ = self.surface.evaluate(audio::MONITOR_RESET_SCRIPT);
        thread::sleep(self.pacing.scaled(audio_config.duration));

        let analysis = audio::analyze(&mut *self.surface, &audio_config);
        let passed = analysis.passed();
        for issue in &analysis.issues {
            self.state.report.record_error("audio_issue", issue.clone());
        }
        self.state.report.audio = Some(AudioOutcome {
            passed,
            analysis: Some(analysis),
            error: None,
        });
    }

    // ------------------------------------------------------------------
    // Endurance
    // ------------------------------------------------------------------

    fn endurance_loop(&mut self, profile: &Profile) {
        let code = self.state.identifier.clone();
        let special = navigation::is_special_game(&code);
        let balance_locator = profile.button_locators.get("balance").cloned();
        let spin_locator = profile.button_locators.get("spin").cloned().unwrap_or_else(|| {
            if special {
                navigation::SPIN_BUTTON_SPECIAL.to_string()
            } else {
                navigation::SPIN_BUTTON.to_string()
            }
        });

        let (max_spins, exit_after, interval_secs, allow_special) = match &self.ctx.scenario {
            Some(s) => (
                s.spin_count,
                s.exit_after_spins,
                s.spin_interval,
                s.features.enable_special_actions,
            ),
            None => (
                Some(self.endurance.max_spins),
                None,
                self.endurance.spin_interval,
                true,
            ),
        };
        let stagnation_limit = self.endurance.stagnation_limit;

        info!(
            "[{}] endurance loop: max_spins={:?} interval={}s stagnation_limit={}",
            self.id, max_spins, interval_secs, stagnation_limit
        );

        loop {
            if self.ctx.control.stop_requested() {
                break;
            }
            if let Some(max) = max_spins {
                if self.state.spin_count >= max {
                    info!("[{}] reached max spins ({}), leaving endurance", self.id, max);
                    break;
                }
            }

            self.ctx.control.wait_while_paused(self.pacing.poll);
            if self.ctx.control.stop_requested() {
                break;
            }

            let loop_start = Instant::now();
            self.check_dead_page();

            let before = navigation::parse_balance(
                &mut *self.surface,
                balance_locator.as_deref(),
                special,
            );
            if let Some(before) = before {
                debug!("[{}] balance before spin: {}", self.id, before);
            }

            // Bounced back to the lobby mid-run: re-enter before spinning.
            if !navigation::is_in_game(&mut *self.surface) {
                warn!("[{}] in lobby mid-endurance, re-entering {}", self.id, code);
                if navigation::enter_game(&mut *self.surface, &code, &self.pacing) {
                    thread::sleep(self.pacing.settle_long);
                } else {
                    thread::sleep(self.pacing.settle_medium);
                    continue;
                }
            }

            if !navigation::safe_click(&mut *self.surface, &Locator::new(&spin_locator)) {
                warn!("[{}] spin click failed, re-entering game", self.id);
                navigation::enter_game(&mut *self.surface, &code, &self.pacing);
                thread::sleep(self.pacing.settle_short);
                continue;
            }
            self.state.spin_count += 1;
            debug!(
                "[{}] spin {}/{}",
                self.id,
                self.state.spin_count,
                max_spins.map(|m| m.to_string()).unwrap_or_else(|| "inf".into())
            );

            if let Some(exit_after) = exit_after {
                if self.state.spin_count >= exit_after {
                    info!("[{}] reached exit-after count ({}), leaving endurance", self.id, exit_after);
                    break;
                }
            }

            thread::sleep(self.pacing.settle_short);
            let after = navigation::parse_balance(
                &mut *self.surface,
                balance_locator.as_deref(),
                special,
            );

            // Unchanged or undetectable both count toward stagnation — a
            // dead balance display is exactly what the trigger is for.
            let changed = match (before, after) {
                (Some(before), Some(after)) => Some(after != before),
                (None, Some(after)) => self.state.last_balance.map(|last| after != last),
                _ => None,
            };
            match changed {
                Some(true) => {
                    debug!("[{}] balance changed, stagnation reset", self.id);
                    self.state.stagnation_count = 0;
                }
                Some(false) | None => {
                    self.state.stagnation_count += 1;
                    debug!(
                        "[{}] balance unchanged ({}/{})",
                        self.id, self.state.stagnation_count, stagnation_limit
                    );
                }
            }

            if self.state.stagnation_count >= stagnation_limit {
                info!(
                    "[{}] {} consecutive unchanged samples, firing special flow",
                    self.id, stagnation_limit
                );
                self.state.stagnation_count = 0;
                if allow_special {
                    self.trigger_special_action(&code);
                }
            }

            if let Some(after) = after {
                self.state.last_balance = Some(after);
            }

            // Residual sleep keeps the loop cadence stable regardless of
            // per-action latency jitter.
            let elapsed = loop_start.elapsed().as_secs_f64();
            let residual = (interval_secs - elapsed).max(0.0);
            thread::sleep(self.pacing.scaled(residual));
        }
    }

    fn trigger_special_action(&mut self, code: &str) {
        let action = self
            .ctx
            .actions
            .special_action_for(code)
            .map(|(kw, action)| (kw.to_string(), action.clone()));
        match action {
            Some((keyword, action)) => {
                info!(
                    "[{}] special action for {}: {:?} take={}",
                    self.id, keyword, action.positions, action.click_take
                );
                navigation::click_positions(
                    &mut *self.surface,
                    &action.positions,
                    action.click_take,
                    &self.pacing,
                );
            }
            None => {
                debug!("[{}] no special action configured for {}", self.id, code);
            }
        }
    }

    /// Throttled dead-page detection with re-navigation recovery.
    fn check_dead_page(&mut self) {
        let check_interval = self.pacing.scaled(30.0);
        if let Some(last) = self.last_dead_check {
            if last.elapsed() < check_interval {
                return;
            }
        }
        self.last_dead_check = Some(Instant::now());

        if !navigation::page_looks_dead(&mut *self.surface) {
            return;
        }
        warn!("[{}] dead page detected, re-navigating", self.id);
        if let Err(err) = self.surface.navigate(&self.target.url) {
            warn!("[{}] recovery navigation failed: {}", self.id, err);
        }
        thread::sleep(self.pacing.settle_long);
    }

    // ------------------------------------------------------------------
    // Reporting
    // ------------------------------------------------------------------

    /// Merge accumulated console errors, deliver the report, archive it.
    fn finish_report(&mut self) {
        self.absorb_console();
        let errors: Vec<ConsoleEvent> = self
            .state
            .console_log
            .iter()
            .filter(|e| e.is_error())
            .cloned()
            .collect();
        self.state.report.console_errors.extend(errors);

        let delivered = self.ctx.sink.send_report(&self.state.report);
        if !delivered {
            warn!("[{}] report delivery failed for {}", self.id, self.state.identifier);
        }
        if let Some(session) = &self.ctx.session {
            session.archive_report(&self.state.report);
        }
    }
}
