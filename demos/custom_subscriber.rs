//! # Example: custom_subscriber
//!
//! Attaches a console subscriber to a run against the in-memory platform.
//!
//! Shows how to:
//! - Implement the [`Subscribe`] trait.
//! - Match on [`EventKind`] to follow each task's lifecycle.
//! - Script per-task behaviors on [`MemoryClient`] (retries, failures).
//!
//! ## Flow
//! ```text
//! TaskGenerator ──► Orchestrator::run()
//!     ├─► Attempt: publish(SessionCreating / SessionCreated / CreationFailed)
//!     ├─► status pushes: publish(StatusChanged / SessionCompleted / SessionFailed)
//!     ├─► RetryPolicy: publish(RetryScheduled | TaskAbandoned)
//!     └─► listener ──► SubscriberSet ──► Console.on_event()
//! ```
//!
//! ## Run
//! ```bash
//! cargo run --example custom_subscriber
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use pqvisor::{
    Behavior, Blueprint, Event, EventKind, MemoryClient, ModeTag, Orchestrator,
    OrchestratorConfig, RunConfig, Subscribe, TaskGenerator,
};

/// Prints a line per interesting event.
struct Console;

#[async_trait::async_trait]
impl Subscribe for Console {
    async fn on_event(&self, ev: &Event) {
        let task = ev.task.map(|t| t.to_string()).unwrap_or_default();
        let reason = ev.reason.as_deref().unwrap_or("");
        match ev.kind {
            EventKind::SessionCreating => {
                println!("[sub] creating:  {task} attempt={}", ev.attempt.unwrap_or(0))
            }
            EventKind::SessionCreated => println!(
                "[sub] created:   {task} serial={}",
                ev.serial.unwrap_or_default()
            ),
            EventKind::CreationFailed => println!("[sub] create err: {task} {reason}"),
            EventKind::RetryScheduled => println!(
                "[sub] retry:     {task} in {}ms",
                ev.delay_ms.unwrap_or_default()
            ),
            EventKind::TaskAbandoned => println!("[sub] abandoned: {task} {reason}"),
            EventKind::SessionCompleted => println!("[sub] completed: {task}"),
            EventKind::SessionFailed => println!("[sub] failed:    {task} {reason}"),
            EventKind::RunFinished => println!("[sub] finished:  {reason}"),
            _ => {}
        }
    }

    fn name(&self) -> &'static str {
        "console"
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("worker.py"), "print('replaying')\n")?;
    let yaml = r#"
name: demo
connection: { url: "https://pq.example.com", username: ops, password: secret }
execution: { worker_script: worker.py, num_partitions: 2, max_concurrent_sessions: 2, heap_size_gb: 4.0 }
replay: { replay_start: "09:30:00", replay_speed: 1.0 }
dates: { start: 2024-01-01, end: 2024-01-02 }
"#;
    let cfg = Arc::new(RunConfig::from_yaml_str(yaml, dir.path())?);

    let d1 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default();
    let d2 = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap_or_default();
    let tasks = TaskGenerator::new(d1, d2, false, 2, ModeTag::Replay)?.generate();

    let ms = Duration::from_millis;
    let client = MemoryClient::new(Behavior::complete_after(ms(300)))
        .script(d1, 1, [Behavior::reject("server busy"), Behavior::complete_after(ms(200))])
        .script(d2, 0, [Behavior::fail_after(ms(150), "NullPointerException in worker")]);

    let mut orch_cfg = OrchestratorConfig::from_run(&cfg);
    orch_cfg.handle_os_signals = false;
    orch_cfg.retry.backoff.first = ms(100);

    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(Console)];
    let orch = Orchestrator::new(orch_cfg, Arc::new(client), Blueprint::new(cfg), subs);

    let report = orch.run(tasks).await?;
    println!("\n{report}");
    Ok(())
}
