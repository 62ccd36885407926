//! Machine QA - automated testing of networked slot-machine game clients.
//!
//! This crate provides:
//! - A thread-safe work queue fanning machine identifiers across workers
//! - A per-worker test lifecycle state machine (entry, test flows,
//!   endurance loop with stagnation-triggered recovery, reporting, exit)
//! - Signal-quality analyzers: reference-image similarity, audio quality,
//!   and video frame health
//! - Profile matching from machine identifiers to family test profiles
//! - A technology-agnostic automation surface trait with a scriptable mock
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use machine_qa::loader::TargetConfig;
//! use machine_qa::notify::MemorySink;
//! use machine_qa::orchestrator::Orchestrator;
//! use machine_qa::profile::{Profile, ProfileCatalog};
//! use machine_qa::surface::MockSurface;
//!
//! let catalog = ProfileCatalog::from_profiles(vec![Profile::named("JJBX")]);
//! let sink = MemorySink::new();
//! let orchestrator = Orchestrator::new(
//!     catalog,
//!     vec!["873-JJBX-0004".to_string()],
//!     Arc::new(sink.clone()),
//! );
//! let targets = vec![TargetConfig {
//!     url: "http://lobby.example/floor-1".into(),
//!     identifier: None,
//!     machine_type: None,
//!     enabled: true,
//! }];
//! orchestrator.run(targets, |_| {
//!     Box::new(MockSurface::new().with_lobby_games(vec!["873-JJBX-0004"]))
//! });
//! println!("{} reports", sink.len());
//! ```

pub mod analysis;
pub mod config;
pub mod loader;
pub mod notify;
pub mod orchestrator;
pub mod profile;
pub mod queue;
pub mod report;
pub mod scenario;
pub mod session;
pub mod surface;
pub mod worker;

// Re-export queue and orchestration types
pub use orchestrator::Orchestrator;
pub use queue::TaskQueue;

// Re-export profile types
pub use profile::{Profile, ProfileCatalog, StepKind, TestFlowStep, extract_family_keyword, match_profile};

// Re-export analyzers
pub use analysis::audio::{AudioAnalysis, AudioConfig, AudioProbe};
pub use analysis::video::VideoThresholds;
pub use analysis::visual::{SimilarityDetail, StageComparison, compare_images};

// Re-export the automation seam
pub use surface::{ConsoleEvent, Locator, MockSurface, SurfaceError, SurfaceResult, UiSurface};

// Re-export worker machinery
pub use worker::{Pacing, Phase, RunControl, Worker, WorkerContext};

// Re-export reporting
pub use notify::{MemorySink, NullSink, ReportSink, WebhookClient};
pub use report::{EntryStatus, TestReport};

// Re-export session management
pub use session::{Session, cleanup_old_sessions};
