//! Integration tests for the worker lifecycle state machine.

use std::sync::Arc;

use machine_qa::config::EnduranceSettings;
use machine_qa::loader::{ActionTables, SpecialAction, TargetConfig};
use machine_qa::notify::MemorySink;
use machine_qa::profile::{Profile, ProfileCatalog};
use machine_qa::queue::TaskQueue;
use machine_qa::report::EntryStatus;
use machine_qa::scenario::TestScenario;
use machine_qa::surface::MockSurface;
use machine_qa::worker::{Pacing, Phase, RunControl, Worker, WorkerContext};

fn target(url: &str) -> TargetConfig {
    TargetConfig {
        url: url.to_string(),
        identifier: None,
        machine_type: None,
        enabled: true,
    }
}

fn context(
    catalog: ProfileCatalog,
    backlog: Vec<&str>,
    sink: &MemorySink,
    actions: ActionTables,
) -> WorkerContext {
    WorkerContext {
        catalog: Arc::new(catalog),
        queue: Arc::new(TaskQueue::new(
            backlog.into_iter().map(String::from).collect(),
        )),
        sink: Arc::new(sink.clone()),
        control: Arc::new(RunControl::new()),
        actions: Arc::new(actions),
        scenario: None,
        session: None,
    }
}

fn quick_endurance(max_spins: u32, stagnation_limit: u32) -> EnduranceSettings {
    EnduranceSettings {
        spin_interval: 0.0,
        max_spins,
        stagnation_limit,
    }
}

#[test]
fn unmatched_then_matched_machine_yields_two_reports() {
    let catalog = ProfileCatalog::from_profiles(vec![Profile::named("JJBX")]);
    let sink = MemorySink::new();
    let ctx = context(
        catalog,
        vec!["873-NOSUCH-0001", "873-JJBX-0004"],
        &sink,
        ActionTables::default(),
    );

    let surface = MockSurface::new()
        .with_lobby_games(vec!["873-JJBX-0004"])
        .with_balances(vec![100, 95, 95, 90]);

    let mut worker = Worker::new("w1", target("http://lobby/a"), Box::new(surface), ctx)
        .with_pacing(Pacing::fast())
        .with_endurance(quick_endurance(2, 10));
    worker.run();

    assert_eq!(worker.phase(), Phase::Terminated);

    let reports = sink.reports();
    assert_eq!(reports.len(), 2, "one report per machine, skip included");

    // First machine had no profile: skipped, never entered.
    assert_eq!(reports[0].identifier, "873-NOSUCH-0001");
    assert_eq!(reports[0].entry_status, EntryStatus::Skipped);
    assert!(reports[0]
        .console_errors
        .iter()
        .any(|e| e.kind == "match_failure"));

    // Second machine completed the full lifecycle.
    assert_eq!(reports[1].identifier, "873-JJBX-0004");
    assert_eq!(reports[1].entry_status, EntryStatus::Success);
    assert_eq!(reports[1].machine_type, "JJBX");
    // Default flow sequence ran: video check and button probes.
    assert!(!reports[1].button_tests.is_empty());
}

#[test]
fn entry_failure_is_reported_and_worker_continues() {
    let catalog = ProfileCatalog::from_profiles(vec![Profile::named("JJBX")]);
    let sink = MemorySink::new();
    let ctx = context(
        catalog,
        vec!["873-JJBX-0004", "873-JJBX-0005"],
        &sink,
        ActionTables::default(),
    );

    // Lobby shows neither card: every entry fails.
    let surface = MockSurface::new().with_lobby_games(vec!["873-OTHER-0001"]);

    let mut worker = Worker::new("w1", target("http://lobby/a"), Box::new(surface), ctx)
        .with_pacing(Pacing::fast())
        .with_endurance(quick_endurance(1, 10));
    worker.run();

    let reports = sink.reports();
    assert_eq!(reports.len(), 2, "a failed entry must not halt the worker");
    for report in &reports {
        assert_eq!(report.entry_status, EntryStatus::Failed);
        assert!(report.console_errors.iter().any(|e| e.kind == "entry_error"));
    }
}

#[test]
fn entry_error_dialog_fails_the_machine() {
    let catalog = ProfileCatalog::from_profiles(vec![Profile::named("JJBX")]);
    let sink = MemorySink::new();
    let ctx = context(catalog, vec!["873-JJBX-0004"], &sink, ActionTables::default());

    // The game renders, but an error dialog is up.
    let surface = MockSurface::new()
        .with_lobby_games(vec!["873-JJBX-0004"])
        .with_present_selectors(vec!["error"]);

    let mut worker = Worker::new("w1", target("http://lobby/a"), Box::new(surface), ctx)
        .with_pacing(Pacing::fast())
        .with_endurance(quick_endurance(1, 10));
    worker.run();

    let reports = sink.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].entry_status, EntryStatus::Failed);
    assert!(reports[0].console_errors.iter().any(|e| e.kind == "dialog"));
}

#[test]
fn stagnation_fires_special_action_exactly_once() {
    let catalog = ProfileCatalog::from_profiles(vec![Profile::named("JJBX")]);
    let sink = MemorySink::new();
    let mut actions = ActionTables::default();
    actions.special_actions.insert(
        "JJBX".to_string(),
        SpecialAction {
            positions: vec!["X9".to_string()],
            click_take: false,
        },
    );
    let ctx = context(catalog, vec!["873-JJBX-0004"], &sink, actions);

    // Balance frozen at 100: every iteration counts as stagnation. With a
    // limit of 10 and 12 spins, the trigger fires exactly once (the counter
    // resets to 0 afterwards and only reaches 2 again).
    let surface = MockSurface::new()
        .with_lobby_games(vec!["873-JJBX-0004"])
        .with_balances(vec![100]);
    let clicks = surface.clicks_handle();

    let mut worker = Worker::new("w1", target("http://lobby/a"), Box::new(surface), ctx)
        .with_pacing(Pacing::fast())
        .with_endurance(quick_endurance(12, 10));
    worker.run();

    let special_clicks = clicks
        .lock()
        .unwrap()
        .iter()
        .filter(|c| c.contains("'X9'"))
        .count();
    assert_eq!(special_clicks, 1, "special flow must fire exactly once");
}

#[test]
fn changing_balance_resets_stagnation_and_never_triggers() {
    let catalog = ProfileCatalog::from_profiles(vec![Profile::named("JJBX")]);
    let sink = MemorySink::new();
    let mut actions = ActionTables::default();
    actions.special_actions.insert(
        "JJBX".to_string(),
        SpecialAction {
            positions: vec!["X9".to_string()],
            click_take: false,
        },
    );
    let ctx = context(catalog, vec!["873-JJBX-0004"], &sink, actions);

    // Two balance reads per spin (before/after). The fourth iteration sees
    // 100 -> 90 across its spin, resetting the counter; the remaining eight
    // iterations cannot reach the limit of 10 again.
    let mut balances = vec![100; 7];
    balances.push(90);
    let surface = MockSurface::new()
        .with_lobby_games(vec!["873-JJBX-0004"])
        .with_balances(balances);
    let clicks = surface.clicks_handle();

    let mut worker = Worker::new("w1", target("http://lobby/a"), Box::new(surface), ctx)
        .with_pacing(Pacing::fast())
        .with_endurance(quick_endurance(12, 10));
    worker.run();

    let special_clicks = clicks
        .lock()
        .unwrap()
        .iter()
        .filter(|c| c.contains("'X9'"))
        .count();
    assert_eq!(special_clicks, 0, "a balance change must reset the counter");
}

#[test]
fn scenario_overrides_spin_count_and_disables_special_actions() {
    let catalog = ProfileCatalog::from_profiles(vec![Profile::named("JJBX")]);
    let sink = MemorySink::new();
    let mut actions = ActionTables::default();
    actions.special_actions.insert(
        "JJBX".to_string(),
        SpecialAction {
            positions: vec!["X9".to_string()],
            click_take: false,
        },
    );
    let mut ctx = context(catalog, vec!["873-JJBX-0004"], &sink, actions);

    let mut scenario: TestScenario =
        serde_json::from_str(r#"{"name": "endurance", "spin_count": 15, "spin_interval": 0.0}"#)
            .unwrap();
    scenario.features.enable_special_actions = false;
    ctx.scenario = Some(scenario);

    let surface = MockSurface::new()
        .with_lobby_games(vec!["873-JJBX-0004"])
        .with_balances(vec![100]);
    let clicks = surface.clicks_handle();

    let mut worker = Worker::new("w1", target("http://lobby/a"), Box::new(surface), ctx)
        .with_pacing(Pacing::fast())
        .with_endurance(quick_endurance(5, 10));
    worker.run();

    // Stagnation reached the limit, but the scenario suppressed the flow.
    let special_clicks = clicks
        .lock()
        .unwrap()
        .iter()
        .filter(|c| c.contains("'X9'"))
        .count();
    assert_eq!(special_clicks, 0);

    // The scenario's spin count (15) overrode the endurance default (5):
    // spin clicks appear once per iteration.
    let spin_clicks = clicks
        .lock()
        .unwrap()
        .iter()
        .filter(|c| c.contains("btn_spin"))
        .count();
    assert_eq!(spin_clicks, 15);
}

#[test]
fn stop_signal_terminates_between_machines() {
    let catalog = ProfileCatalog::from_profiles(vec![Profile::named("JJBX")]);
    let sink = MemorySink::new();
    let ctx = context(
        catalog,
        vec!["873-JJBX-0001", "873-JJBX-0002", "873-JJBX-0003"],
        &sink,
        ActionTables::default(),
    );
    // Stop before the run: the worker must terminate without taking work.
    ctx.control.request_stop();

    let surface = MockSurface::new().with_lobby_games(vec![
        "873-JJBX-0001",
        "873-JJBX-0002",
        "873-JJBX-0003",
    ]);

    let mut worker = Worker::new("w1", target("http://lobby/a"), Box::new(surface), ctx.clone())
        .with_pacing(Pacing::fast())
        .with_endurance(quick_endurance(1, 10));
    worker.run();

    assert_eq!(worker.phase(), Phase::Terminated);
    assert!(sink.is_empty());
    assert_eq!(ctx.queue.remaining_count(), 3);
}

#[test]
fn keyword_actions_run_after_entry_step() {
    let mut profile = Profile::named("JJBX");
    profile.test_flows = vec![machine_qa::profile::TestFlowStep::named("entry")];
    let catalog = ProfileCatalog::from_profiles(vec![profile]);

    let sink = MemorySink::new();
    let mut actions = ActionTables::default();
    actions
        .keyword_actions
        .insert("JJBX".to_string(), vec!["K1".to_string(), "K2".to_string()]);
    let ctx = context(catalog, vec!["873-JJBX-0004"], &sink, actions);

    let surface = MockSurface::new()
        .with_lobby_games(vec!["873-JJBX-0004"])
        .with_balances(vec![100, 90]);
    let clicks = surface.clicks_handle();

    let mut worker = Worker::new("w1", target("http://lobby/a"), Box::new(surface), ctx)
        .with_pacing(Pacing::fast())
        .with_endurance(quick_endurance(1, 10));
    worker.run();

    let clicks = clicks.lock().unwrap();
    assert!(clicks.iter().any(|c| c.contains("'K1'")));
    assert!(clicks.iter().any(|c| c.contains("'K2'")));
}
