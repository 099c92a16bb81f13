//! # pqvisor
//!
//! **pqvisor** fans a date range out into per-`(date, partition)` remote
//! sessions (replays or batch runs), keeps at most `max_concurrent_sessions`
//! of them creating or running, retries failed creations with backoff and
//! reports every task's fate in an exit code.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   RunConfig (YAML, validated) ──► TaskGenerator ──► [Task; dates × partitions]
//!                                                              │
//! ┌────────────────────────────────────────────────────────────▼──────┐
//! │  Orchestrator (single-owner control loop)                         │
//! │  - Admission (pending queue, active set ≤ max, retry parking)     │
//! │  - RetryPolicy (exponential backoff, optional jitter)             │
//! │  - Status monitor (classify pushes, stall detection)              │
//! │  - Shutdown coordinator (drain on 1st signal, terminate on 2nd)   │
//! └──────┬──────────────────────────────▲─────────────────────┬───────┘
//!        │ create / subscribe / delete  │ Inbound channel     │ publish
//!        ▼                              │                     ▼
//! ┌──────────────────────────┐          │       ┌───────────────────────────┐
//! │ SessionClient            │──────────┘       │ Bus (broadcast channel)   │
//! │ (ProcessClient,          │ StatusSink       └─────────────┬─────────────┘
//! │  MemoryClient, ...)      │                                ▼
//! └──────────────────────────┘                  ┌───────────────────────────┐
//!                                               │ SubscriberSet             │
//!                                               │ (per-subscriber queues)   │
//!                                               └──────┬──────────┬─────────┘
//!                                                      ▼          ▼
//!                                                  LogWriter   custom ...
//! ```
//!
//! ### Lifecycle of a task
//! ```text
//! pending ──admit──► Creating ──created──► Active ──Completed/Stopped──► completed
//!    ▲                  │                    │
//!    │                  │ error/timeout      ├──Failed──────────────────► failed_execution
//!    │                  ▼                    │
//!    └──retry delay── RetryPolicy ◄──────────┘ Failed (no capacity): delete, retry
//!                       │
//!                       └──exhausted/fatal──► abandoned
//! ```
//!
//! ## Features
//! | Area              | Description                                               | Key types / traits                          |
//! |-------------------|-----------------------------------------------------------|---------------------------------------------|
//! | **Configuration** | Strict YAML loading, `${VAR}` expansion, validation.       | [`RunConfig`], [`ConfigError`]              |
//! | **Tasks**         | Date × partition expansion and session descriptors.       | [`TaskGenerator`], [`Blueprint`]            |
//! | **Clients**       | Platform abstraction plus local-process and memory backends. | [`SessionClient`], [`ProcessClient`], [`MemoryClient`] |
//! | **Policies**      | Retry budget, backoff and jitter.                          | [`RetryPolicy`], [`BackoffPolicy`]          |
//! | **Orchestration** | Bounded admission, retries, drain/terminate.               | [`Orchestrator`], [`OrchestratorConfig`]    |
//! | **Subscriber API**| Observe lifecycle events (logging, custom sinks).         | [`Subscribe`], [`LogWriter`]                |
//! | **Reporting**     | Final counters, failed tasks, exit code.                  | [`RunReport`], [`ExitCode`]                 |
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use chrono::NaiveDate;
//! use pqvisor::{Behavior, MemoryClient, ModeTag, Orchestrator, OrchestratorConfig, TaskGenerator};
//!
//! # fn blueprint() -> pqvisor::Blueprint {
//! #     let dir = tempfile::tempdir().unwrap();
//! #     std::fs::write(dir.path().join("worker.py"), "print('hi')").unwrap();
//! #     let yaml = concat!(
//! #         "name: demo\n",
//! #         "connection: { url: 'https://pq.example.com', username: ops, password: secret }\n",
//! #         "execution: { worker_script: worker.py, num_partitions: 2, max_concurrent_sessions: 2, heap_size_gb: 4.0 }\n",
//! #         "replay: { replay_start: '09:30:00', replay_speed: 1.0 }\n",
//! #         "dates: { start: 2024-01-01, end: 2024-01-03 }\n",
//! #     );
//! #     let cfg = pqvisor::RunConfig::from_yaml_str(yaml, dir.path()).unwrap();
//! #     pqvisor::Blueprint::new(Arc::new(cfg))
//! # }
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let tasks = TaskGenerator::new(
//!         NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
//!         NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
//!         false,
//!         2,
//!         ModeTag::Replay,
//!     )?
//!     .generate();
//!
//!     let cfg = OrchestratorConfig {
//!         max_concurrent: 2,
//!         ..OrchestratorConfig::default()
//!     };
//!     let client = MemoryClient::new(Behavior::complete_after(Duration::from_millis(10)));
//!     let orch = Orchestrator::new(cfg, Arc::new(client), blueprint(), Vec::new());
//!
//!     let report = orch.run(tasks).await?;
//!     assert_eq!(report.headline(), "6/6 completed, 0 failed.");
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod core;
mod error;
mod events;
mod policies;
mod report;
mod subscribers;
mod tasks;

// ---- Public re-exports ----

pub use client::{
    Behavior, CreateOutcome, MemoryClient, ProcessClient, SessionClient, SessionHandle,
    SessionStatus, StatusSink, StatusUpdate,
};
pub use config::{
    Auth, BatchConfig, ConnectionConfig, DateRange, ExecutionConfig, ModeConfig, ReplayConfig,
    RunConfig, ScriptLanguage, TimestampColumn,
};
pub use core::{
    Classification, Orchestrator, OrchestratorConfig, RESOURCE_UNAVAILABLE_MARKERS, RunState,
    ShutdownHandle, ShutdownPhase, StallDetector, classify,
};
pub use error::{ConfigError, RuntimeError, SessionError, TaskGenError};
pub use events::{Bus, Event, EventKind};
pub use policies::{BackoffPolicy, JitterPolicy, RetryDecision, RetryPolicy};
pub use report::{ExitCode, FailedTask, FailureKind, RunReport};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
pub use tasks::{
    Blueprint, FieldValue, MAX_PARTITIONS, ModeTag, SessionDescriptor, Task, TaskGenerator,
};
