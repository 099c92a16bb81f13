mod common;

use std::sync::Arc;
use std::time::Duration;

use pqvisor::{
    Behavior, EventKind, ExitCode, FailureKind, MemoryClient, Orchestrator, OrchestratorConfig,
    RunReport, Subscribe, Task,
};

use common::{Collect, blueprint, config, day, task, tasks};

async fn run(cfg: OrchestratorConfig, client: &MemoryClient, tasks: Vec<Task>) -> RunReport {
    Orchestrator::new(cfg, Arc::new(client.clone()), blueprint(), Vec::new())
        .run(tasks)
        .await
        .unwrap()
}

fn assert_every_task_terminal(report: &RunReport) {
    assert_eq!(report.state.terminal(), report.state.total, "{report:?}");
}

#[tokio::test(start_paused = true)]
async fn all_tasks_complete() {
    let client = MemoryClient::new(Behavior::complete_after(Duration::from_secs(1)));

    let report = run(config(2), &client, tasks(1, 3, 2)).await;

    assert_eq!(report.headline(), "6/6 completed, 0 failed.");
    assert_eq!(report.exit_code(), ExitCode::Success);
    assert_eq!(report.state.created, 6);
    assert!(report.failures.is_empty());
    assert_eq!(client.created().len(), 6);
    assert_eq!(client.created()[0], "replay_sim_20240101_0");
    // Completed sessions are deleted by default.
    assert_eq!(report.deleted, 6);
    assert_eq!(client.deleted().len(), 6);
    assert_eq!(client.live(), 0);
}

#[tokio::test(start_paused = true)]
async fn generated_run_from_config() {
    let cfg = Arc::new(common::load(common::REPLAY));
    let tasks = cfg.task_generator().unwrap().generate();
    let client = MemoryClient::default();

    let mut orch_cfg = OrchestratorConfig::from_run(&cfg);
    orch_cfg.handle_os_signals = false;

    let report = Orchestrator::new(
        orch_cfg,
        Arc::new(client.clone()),
        pqvisor::Blueprint::new(Arc::clone(&cfg)),
        Vec::new(),
    )
    .run(tasks)
    .await
    .unwrap();

    // 2024-01-01..05 are Monday..Friday.
    assert_eq!(report.headline(), "10/10 completed, 0 failed.");
    assert_eq!(report.exit_code(), ExitCode::Success);
    assert!(client.peak_live() <= 2);
}

#[tokio::test(start_paused = true)]
async fn zero_tasks_is_success() {
    let client = MemoryClient::default();
    let report = run(config(4), &client, Vec::new()).await;

    assert_eq!(report.headline(), "0/0 completed, 0 failed.");
    assert_eq!(report.exit_code(), ExitCode::Success);
    assert_eq!(client.total_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn concurrency_never_exceeds_bound() {
    let client = MemoryClient::new(
        Behavior::complete_after(Duration::from_secs(2)).with_create_delay(Duration::from_millis(500)),
    );

    let report = run(config(3), &client, tasks(1, 10, 2)).await;

    assert_eq!(report.state.completed, 20);
    assert_eq!(client.peak_live(), 3);
}

#[tokio::test(start_paused = true)]
async fn always_failing_creation_is_attempted_max_retries_plus_one_times() {
    let client = MemoryClient::new(Behavior::reject("no capacity"));
    let mut cfg = config(1);
    cfg.retry.max_retries = 2;

    let report = run(cfg, &client, vec![task(2, 0)]).await;

    assert_eq!(client.attempts(day(2), 0), 3);
    assert_eq!(report.state.abandoned, 1);
    assert_eq!(report.state.failed_creation, 1);
    assert_eq!(report.state.creation_errors, 3);
    assert_eq!(report.exit_code(), ExitCode::CreationFailures);
    assert_eq!(report.failures[0].kind, FailureKind::RetriesExhausted);
    assert!(report.failures[0].reason.contains("no capacity"));
    assert_every_task_terminal(&report);
}

#[tokio::test(start_paused = true)]
async fn fatal_creation_is_not_retried() {
    let client = MemoryClient::new(Behavior::reject_fatal("bad credentials"));

    let report = run(config(1), &client, vec![task(2, 0), task(2, 1)]).await;

    assert_eq!(client.total_attempts(), 2);
    assert_eq!(report.state.abandoned, 2);
    assert!(report.failures.iter().all(|f| f.kind == FailureKind::Fatal));
}

#[tokio::test(start_paused = true)]
async fn retry_succeeds_after_transient_failures() {
    let client = MemoryClient::default().script(
        day(1),
        1,
        [
            Behavior::reject("busy"),
            Behavior::reject("busy"),
            Behavior::complete_after(Duration::from_secs(1)),
        ],
    );

    let report = run(config(2), &client, tasks(1, 1, 2)).await;

    assert_eq!(client.attempts(day(1), 1), 3);
    assert_eq!(report.headline(), "2/2 completed, 0 failed.");
    assert_eq!(report.state.creation_errors, 2);
}

#[tokio::test(start_paused = true)]
async fn creation_timeout_counts_as_retryable_failure() {
    let client = MemoryClient::new(
        Behavior::complete_after(Duration::from_secs(1)).with_create_delay(Duration::from_secs(10)),
    );
    let mut cfg = config(1);
    cfg.init_timeout = Duration::from_secs(2);
    cfg.retry.max_retries = 1;

    let report = run(cfg, &client, vec![task(3, 0)]).await;

    assert_eq!(client.attempts(day(3), 0), 2);
    assert_eq!(report.failures[0].kind, FailureKind::RetriesExhausted);
    assert!(report.failures[0].reason.contains("timed out"));
    // Dropped creates released their slot.
    assert_eq!(client.live(), 0);
}

#[tokio::test(start_paused = true)]
async fn execution_failure_is_terminal_and_kept_for_inspection() {
    let client = MemoryClient::default().script(
        day(1),
        0,
        [Behavior::fail_after(Duration::from_secs(1), "NameError: foo")],
    );

    let report = run(config(2), &client, tasks(1, 1, 2)).await;

    assert_eq!(client.attempts(day(1), 0), 1);
    assert_eq!(report.state.failed_execution, 1);
    assert_eq!(report.state.completed, 1);
    assert_eq!(report.exit_code(), ExitCode::ExecutionFailures);
    assert_eq!(report.failures[0].kind, FailureKind::Execution);
    assert_eq!(report.failures[0].reason, "NameError: foo");
    assert_eq!(client.deleted(), vec!["replay_sim_20240101_1".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn delete_flags_select_what_is_cleaned_up() {
    let client = MemoryClient::default().script(
        day(1),
        0,
        [Behavior::fail_after(Duration::from_secs(1), "boom")],
    );
    let mut cfg = config(2);
    cfg.delete_successful = false;
    cfg.delete_failed = true;

    let report = run(cfg, &client, tasks(1, 1, 2)).await;

    assert_eq!(report.deleted, 1);
    assert_eq!(client.deleted(), vec!["replay_sim_20240101_0".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn failing_deletes_are_reported_not_fatal() {
    let client = MemoryClient::default().with_failing_deletes();

    let report = run(config(2), &client, tasks(1, 1, 2)).await;

    assert_eq!(report.exit_code(), ExitCode::Success);
    assert_eq!(report.deleted, 0);
    assert_eq!(report.delete_failures, 2);
}

#[tokio::test(start_paused = true)]
async fn resource_unavailable_is_deleted_and_retried() {
    let client = MemoryClient::default().script(
        day(4),
        0,
        [
            Behavior::resource_unavailable_after(Duration::from_secs(1)),
            Behavior::complete_after(Duration::from_secs(1)),
        ],
    );
    let collect = Arc::new(Collect::default());
    let subs: Vec<Arc<dyn Subscribe>> = vec![collect.clone()];

    let report = Orchestrator::new(config(1), Arc::new(client.clone()), blueprint(), subs)
        .run(vec![task(4, 0)])
        .await
        .unwrap();

    assert_eq!(client.attempts(day(4), 0), 2);
    assert_eq!(report.headline(), "1/1 completed, 0 failed.");
    assert_eq!(report.state.failed_execution, 0);
    // The capacity failure and the completed retry.
    assert_eq!(client.deleted().len(), 2);
    assert_eq!(collect.count(EventKind::ResourceUnavailable), 1);
    assert_eq!(collect.count(EventKind::RetryScheduled), 1);
}

#[tokio::test(start_paused = true)]
async fn failure_limit_stops_admission() {
    let client = MemoryClient::new(Behavior::fail_after(Duration::from_secs(1), "boom"));
    let mut cfg = config(1);
    cfg.max_failures = 2;

    let report = run(cfg, &client, tasks(1, 3, 2)).await;

    assert!(report.failure_limit_reached);
    assert_eq!(client.total_attempts(), 2);
    assert_eq!(report.state.failed_execution, 2);
    assert_eq!(report.state.abandoned, 4);
    assert_eq!(report.state.failed_creation, 0);
    assert_eq!(report.exit_code(), ExitCode::ExecutionFailures);
    assert!(
        report
            .failures
            .iter()
            .filter(|f| f.kind == FailureKind::NotStarted)
            .count()
            == 4
    );
    assert_every_task_terminal(&report);
}

#[tokio::test(start_paused = true)]
async fn first_signal_drains_active_sessions() {
    let client = MemoryClient::new(Behavior::complete_after(Duration::from_secs(10)));
    let collect = Arc::new(Collect::default());
    let subs: Vec<Arc<dyn Subscribe>> = vec![collect.clone()];
    let orch = Orchestrator::new(config(2), Arc::new(client.clone()), blueprint(), subs);
    let shutdown = orch.shutdown_handle();

    let handle = tokio::spawn(orch.run(tasks(1, 3, 2)));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(shutdown.trigger());
    let report = handle.await.unwrap().unwrap();

    assert!(report.interrupted);
    assert!(!report.forced);
    assert_eq!(report.state.completed, 2);
    assert_eq!(report.state.abandoned, 4);
    assert_eq!(client.total_attempts(), 2);
    assert_eq!(report.exit_code(), ExitCode::CreationFailures);
    assert_eq!(collect.count(EventKind::ShutdownRequested), 1);
    assert_every_task_terminal(&report);

    // Nothing entered Creating after the signal.
    let events = collect.events();
    let signal_seq = events
        .iter()
        .find(|e| e.kind == EventKind::ShutdownRequested)
        .map(|e| e.seq)
        .unwrap();
    assert!(
        events
            .iter()
            .filter(|e| e.kind == EventKind::SessionCreating)
            .all(|e| e.seq < signal_seq)
    );
}

#[tokio::test(start_paused = true)]
async fn second_signal_terminates_and_deletes_active_sessions() {
    let client = MemoryClient::new(Behavior::hang());
    let orch = Orchestrator::new(config(2), Arc::new(client.clone()), blueprint(), Vec::new());
    let shutdown = orch.shutdown_handle();

    let handle = tokio::spawn(orch.run(tasks(1, 3, 2)));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(shutdown.trigger());
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(shutdown.trigger());
    let report = handle.await.unwrap().unwrap();

    assert!(report.forced);
    assert_eq!(report.state.completed, 0);
    assert_eq!(report.state.abandoned, 6);
    assert_eq!(
        report
            .failures
            .iter()
            .filter(|f| f.kind == FailureKind::ForcedTermination)
            .count(),
        2
    );
    assert_eq!(report.deleted, 2);
    assert_eq!(client.live(), 0);
    assert_every_task_terminal(&report);
}

#[tokio::test(start_paused = true)]
async fn stalls_are_reported_as_warnings() {
    let client = MemoryClient::new(Behavior::hang());
    let collect = Arc::new(Collect::default());
    let subs: Vec<Arc<dyn Subscribe>> = vec![collect.clone()];
    let mut cfg = config(1);
    cfg.stall_iterations = 3;
    cfg.startup_stall_iterations = 5;
    let orch = Orchestrator::new(cfg, Arc::new(client.clone()), blueprint(), subs);
    let shutdown = orch.shutdown_handle();

    let handle = tokio::spawn(orch.run(vec![task(1, 0)]));
    tokio::time::sleep(Duration::from_secs(12)).await;
    shutdown.trigger();
    shutdown.trigger();
    let report = handle.await.unwrap().unwrap();

    assert!(report.state.stalls >= 1);
    assert_eq!(collect.count(EventKind::StallDetected), report.state.stalls);
}

#[tokio::test(start_paused = true)]
async fn lifecycle_events_in_order() {
    let client = MemoryClient::default();
    let collect = Arc::new(Collect::default());
    let subs: Vec<Arc<dyn Subscribe>> = vec![collect.clone()];

    Orchestrator::new(config(1), Arc::new(client), blueprint(), subs)
        .run(vec![task(5, 1)])
        .await
        .unwrap();

    let kinds: Vec<EventKind> = collect
        .kinds()
        .into_iter()
        .filter(|k| *k != EventKind::StatusChanged)
        .collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::SessionCreating,
            EventKind::SessionCreated,
            EventKind::SessionCompleted,
            EventKind::SessionDeleted,
            EventKind::RunFinished,
        ]
    );
    let events = collect.events();
    assert!(events.windows(2).all(|w| w[0].seq < w[1].seq));
    assert_eq!(events[0].task, Some(task(5, 1)));
}
