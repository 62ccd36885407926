//! Run orchestration: queue construction, worker threads, completion.
//!
//! Deliberately thin — all the interesting behavior lives in the workers.
//! One OS thread per configured target, start-up staggered by a small
//! randomized delay so N browser surfaces do not spike resources together.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use crate::config::EnduranceSettings;
use crate::loader::{ActionTables, TargetConfig};
use crate::notify::ReportSink;
use crate::profile::types::ProfileCatalog;
use crate::queue::TaskQueue;
use crate::scenario::TestScenario;
use crate::session::Session;
use crate::surface::UiSurface;
use crate::worker::control::RunControl;
use crate::worker::navigation::Pacing;
use crate::worker::runner::{Worker, WorkerContext};

/// Everything a run needs besides its targets and surfaces.
pub struct Orchestrator {
    pub catalog: Arc<ProfileCatalog>,
    pub queue: Arc<TaskQueue>,
    pub sink: Arc<dyn ReportSink>,
    pub control: Arc<RunControl>,
    pub actions: Arc<ActionTables>,
    pub scenario: Option<TestScenario>,
    pub session: Option<Arc<Session>>,
    pub pacing: Pacing,
    pub endurance: Option<EnduranceSettings>,
}

impl Orchestrator {
    pub fn new(
        catalog: ProfileCatalog,
        backlog: Vec<String>,
        sink: Arc<dyn ReportSink>,
    ) -> Self {
        Self {
            catalog: Arc::new(catalog),
            queue: Arc::new(TaskQueue::new(backlog)),
            sink,
            control: Arc::new(RunControl::new()),
            actions: Arc::new(ActionTables::default()),
            scenario: None,
            session: None,
            pacing: Pacing::default(),
            endurance: None,
        }
    }

    pub fn with_actions(mut self, actions: ActionTables) -> Self {
        self.actions = Arc::new(actions);
        self
    }

    pub fn with_scenario(mut self, scenario: Option<TestScenario>) -> Self {
        self.scenario = scenario;
        self
    }

    pub fn with_session(mut self, session: Session) -> Self {
        self.session = Some(Arc::new(session));
        self
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_endurance(mut self, endurance: EnduranceSettings) -> Self {
        self.endurance = Some(endurance);
        self
    }

    /// Shared stop/pause control for this run.
    pub fn control(&self) -> Arc<RunControl> {
        Arc::clone(&self.control)
    }

    fn worker_context(&self) -> WorkerContext {
        WorkerContext {
            catalog: Arc::clone(&self.catalog),
            queue: Arc::clone(&self.queue),
            sink: Arc::clone(&self.sink),
            control: Arc::clone(&self.control),
            actions: Arc::clone(&self.actions),
            scenario: self.scenario.clone(),
            session: self.session.clone(),
        }
    }

    /// Spawn one worker per target and block until every worker finishes.
    ///
    /// `surface_factory` builds the automation surface each worker will
    /// exclusively own.
    pub fn run<F>(&self, targets: Vec<TargetConfig>, surface_factory: F)
    where
        F: Fn(&TargetConfig) -> Box<dyn UiSurface>,
    {
        if targets.is_empty() {
            warn!("[Orchestrator] no enabled targets, nothing to do");
            return;
        }

        info!(
            "[Orchestrator] starting {} workers over {} queued machines",
            targets.len(),
            self.queue.remaining_count()
        );

        let mut handles = Vec::with_capacity(targets.len());
        let target_count = targets.len();

        for (index, target) in targets.into_iter().enumerate() {
            let worker_name = format!("worker-{}", index + 1);
            let surface = surface_factory(&target);
            let mut worker = Worker::new(&worker_name, target, surface, self.worker_context())
                .with_pacing(self.pacing.clone());
            if let Some(endurance) = &self.endurance {
                worker = worker.with_endurance(endurance.clone());
            }

            info!("[Orchestrator] launching {}", worker_name);
            let handle = thread::Builder::new()
                .name(worker_name.clone())
                .spawn(move || worker.run())
                .expect("failed to spawn worker thread");
            handles.push(handle);

            // Staggered start: load shaping, not correctness.
            if index + 1 < target_count {
                let jitter = 1.0 + rand::thread_rng().gen_range(0.0..1.0);
                thread::sleep(self.pacing.scaled(jitter));
            }
        }

        for handle in handles {
            if let Err(err) = handle.join() {
                warn!("[Orchestrator] worker thread panicked: {:?}", err);
            }
        }

        info!("[Orchestrator] all workers finished, progress {}", self.queue.progress());
        for (worker, codes) in self.queue.history() {
            info!("[Orchestrator]   {}: {} machines - {:?}", worker, codes.len(), codes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::MemorySink;
    use crate::profile::types::Profile;
    use crate::surface::MockSurface;

    #[test]
    fn test_orchestrator_drains_queue_across_workers() {
        let catalog = ProfileCatalog::from_profiles(vec![Profile::named("JJBX")]);
        let backlog: Vec<String> = (1..=6).map(|i| format!("873-JJBX-{:04}", i)).collect();
        let sink = MemorySink::new();

        let orchestrator = Orchestrator::new(catalog, backlog, Arc::new(sink.clone()))
            .with_pacing(Pacing::fast())
            .with_endurance(EnduranceSettings {
                spin_interval: 0.0,
                max_spins: 1,
                stagnation_limit: 10,
            });

        let targets = vec![
            TargetConfig {
                url: "http://lobby/a".into(),
                identifier: None,
                machine_type: None,
                enabled: true,
            },
            TargetConfig {
                url: "http://lobby/b".into(),
                identifier: None,
                machine_type: None,
                enabled: true,
            },
        ];

        orchestrator.run(targets, |_| {
            Box::new(
                MockSurface::new()
                    .with_lobby_games(vec![
                        "873-JJBX-0001",
                        "873-JJBX-0002",
                        "873-JJBX-0003",
                        "873-JJBX-0004",
                        "873-JJBX-0005",
                        "873-JJBX-0006",
                    ])
                    .with_balances(vec![100]),
            )
        });

        // Six machines, six reports, split across two workers.
        assert_eq!(sink.len(), 6);
        assert!(orchestrator.queue.is_done());
        let history = orchestrator.queue.history();
        let total: usize = history.values().map(|v| v.len()).sum();
        assert_eq!(total, 6);
    }
}
