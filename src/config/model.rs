//! # Validated run configuration.
//!
//! [`RunConfig`] is produced once by [`RunConfig::load`] and never mutated.
//! Every value in it has already passed its range check, so downstream code
//! (generator, descriptor builder, orchestrator) does not re-validate.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime};

use crate::error::TaskGenError;
use crate::policies::{BackoffPolicy, JitterPolicy, RetryPolicy};
use crate::tasks::{ModeTag, TaskGenerator};

/// Immutable, validated run parameters.
#[derive(Clone, Debug)]
pub struct RunConfig {
    /// Simulation name; part of every session name.
    pub name: String,
    /// Where and as whom sessions are created.
    pub connection: ConnectionConfig,
    /// Worker, sizing and retry knobs.
    pub execution: ExecutionConfig,
    /// Replay or batch parameters.
    pub mode: ModeConfig,
    /// Dates to process.
    pub dates: DateRange,
    /// User environment, in document order.
    pub env: Vec<(String, String)>,
}

impl RunConfig {
    /// Builds the task generator for this run.
    pub fn task_generator(&self) -> Result<TaskGenerator, TaskGenError> {
        TaskGenerator::new(
            self.dates.start,
            self.dates.end,
            self.dates.weekdays_only,
            self.execution.num_partitions,
            self.mode.tag(),
        )
    }

    /// Retry policy: `retry_delay` doubling up to `retry_max_delay`.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.execution.max_retries,
            backoff: BackoffPolicy {
                first: self.execution.retry_delay,
                max: self.execution.retry_max_delay,
                factor: 2.0,
                jitter: self.execution.retry_jitter,
            },
        }
    }
}

/// Platform endpoint and credentials.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Platform URL.
    pub url: String,
    /// User the sessions are created as (also the session owner).
    pub username: String,
    /// Authentication method.
    pub auth: Auth,
}

/// Authentication method.
#[derive(Clone)]
pub enum Auth {
    /// Username/password.
    Password {
        /// Secret; never printed.
        password: String,
    },
    /// Private key file.
    PrivateKey {
        /// Key location.
        path: PathBuf,
    },
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::Password { .. } => f
                .debug_struct("Password")
                .field("password", &"<redacted>")
                .finish(),
            Auth::PrivateKey { path } => f.debug_struct("PrivateKey").field("path", path).finish(),
        }
    }
}

/// Interpreter the worker script is written for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptLanguage {
    /// `Python`
    Python,
    /// `Groovy`
    Groovy,
}

impl ScriptLanguage {
    /// Name as the platform expects it.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptLanguage::Python => "Python",
            ScriptLanguage::Groovy => "Groovy",
        }
    }
}

/// Execution parameters.
#[derive(Clone, Debug)]
pub struct ExecutionConfig {
    /// Absolute path of the worker script.
    pub worker_script: PathBuf,
    /// Script body, read once at load time.
    pub script: Arc<str>,
    /// Partitions per date, `[1, 1000]`.
    pub num_partitions: u32,
    /// Admission bound, `[1, 1000]`.
    pub max_concurrent_sessions: u32,
    /// Retries per task after the first attempt.
    pub max_retries: u32,
    /// Failures before the run stops admitting; `0` = unlimited.
    pub max_failures: u32,
    /// Worker heap in GB, `(0, 512]`.
    pub heap_size_gb: f64,
    /// Worker interpreter.
    pub script_language: ScriptLanguage,
    /// JVM profile name.
    pub jvm_profile: String,
    /// Server (or server group) to run on.
    pub server_name: String,
    /// Bound on a single creation attempt.
    pub init_timeout: Duration,
    /// First retry delay.
    pub retry_delay: Duration,
    /// Retry delay cap.
    pub retry_max_delay: Duration,
    /// Retry jitter.
    pub retry_jitter: JitterPolicy,
    /// Delete sessions that completed.
    pub delete_successful: bool,
    /// Delete sessions that failed.
    pub delete_failed: bool,
    /// Idle ticks before a stall warning.
    pub stall_iterations: u32,
    /// Idle ticks before a stall warning until the first terminal outcome.
    pub startup_stall_iterations: u32,
}

/// Mode-specific parameters; exactly one of replay or batch.
#[derive(Clone, Debug, PartialEq)]
pub enum ModeConfig {
    /// Replay of historical data at `replay_speed`.
    Replay(ReplayConfig),
    /// One-shot batch run.
    Batch(BatchConfig),
}

impl ModeConfig {
    /// Mode tag carried by every task.
    pub fn tag(&self) -> ModeTag {
        match self {
            ModeConfig::Replay(_) => ModeTag::Replay,
            ModeConfig::Batch(_) => ModeTag::Batch,
        }
    }
}

/// Replay parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct ReplayConfig {
    /// Simulated start-of-day.
    pub replay_start: NaiveTime,
    /// Speed multiplier, `[1, 100]`.
    pub replay_speed: f64,
    /// Replay rows in timestamp order.
    pub sorted_replay: bool,
    /// Replay buffer size.
    pub buffer_rows: Option<u64>,
    /// Per-table timestamp column overrides.
    pub timestamp_columns: Vec<TimestampColumn>,
}

/// Timestamp column override for one table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimestampColumn {
    /// Table namespace.
    pub namespace: String,
    /// Table name.
    pub table: String,
    /// Column holding the replay timestamp.
    pub column: String,
}

/// Batch parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchConfig {
    /// Hard limit enforced by the platform.
    pub timeout: Duration,
}

/// Inclusive date range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateRange {
    /// First date.
    pub start: NaiveDate,
    /// Last date, `>= start`.
    pub end: NaiveDate,
    /// Skip Saturdays and Sundays.
    pub weekdays_only: bool,
}
