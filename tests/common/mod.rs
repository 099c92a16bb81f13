#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use pqvisor::{
    BackoffPolicy, Blueprint, Event, EventKind, JitterPolicy, ModeTag, OrchestratorConfig,
    RetryPolicy, RunConfig, Subscribe, Task,
};

pub const REPLAY: &str = r#"
name: sim
connection:
  url: https://pq.example:8000
  username: alice
  password: s3cret
execution:
  worker_script: worker.py
  num_partitions: 2
  max_concurrent_sessions: 2
  heap_size_gb: 4.0
replay:
  replay_start: "09:30:00"
  replay_speed: 1.0
dates:
  start: 2024-01-01
  end: 2024-01-05
  weekdays_only: true
env:
  LOG_LEVEL: INFO
"#;

/// Loads `yaml` against a scratch directory holding `worker.py`.
pub fn load(yaml: &str) -> RunConfig {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("worker.py"), "print('hi')\n").unwrap();
    RunConfig::from_yaml_str(yaml, dir.path()).unwrap()
}

pub fn load_in(yaml: &str, dir: &Path) -> RunConfig {
    RunConfig::from_yaml_str(yaml, dir).unwrap()
}

pub fn blueprint() -> Blueprint {
    Blueprint::new(Arc::new(load(REPLAY)))
}

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
}

pub fn task(d: u32, partition: u32) -> Task {
    Task::new(day(d), partition, ModeTag::Replay)
}

/// Days `first..=last` of January 2024, `partitions` each, generator order.
pub fn tasks(first: u32, last: u32, partitions: u32) -> Vec<Task> {
    (first..=last)
        .flat_map(|d| (0..partitions).map(move |p| task(d, p)))
        .collect()
}

/// Orchestrator settings with one-second retries and stall warnings off.
pub fn config(max_concurrent: usize) -> OrchestratorConfig {
    OrchestratorConfig {
        max_concurrent,
        retry: RetryPolicy {
            max_retries: 3,
            backoff: BackoffPolicy {
                first: Duration::from_secs(1),
                max: Duration::from_secs(8),
                factor: 2.0,
                jitter: JitterPolicy::None,
            },
        },
        max_failures: 0,
        stall_iterations: 0,
        startup_stall_iterations: 0,
        ..OrchestratorConfig::default()
    }
}

/// Records every event it sees.
#[derive(Default)]
pub struct Collect(Mutex<Vec<Event>>);

impl Collect {
    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().into_iter().map(|e| e.kind).collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events().iter().filter(|e| e.kind == kind).count()
    }
}

#[async_trait]
impl Subscribe for Collect {
    async fn on_event(&self, ev: &Event) {
        self.0.lock().unwrap().push(ev.clone());
    }

    fn name(&self) -> &'static str {
        "collect"
    }

    fn queue_capacity(&self) -> usize {
        8192
    }
}
