//! Raw YAML document, exactly as written by the user.
//!
//! Every struct rejects unknown keys. Numbers are read wide (`i64`/`f64`) so
//! range checks in [`super::load`] can report the offending value instead of a
//! generic type error. Nothing here is validated yet.

use serde::Deserialize;

use crate::policies::JitterPolicy;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawConfig {
    pub name: String,
    pub connection: RawConnection,
    pub execution: RawExecution,
    #[serde(default)]
    pub replay: Option<RawReplay>,
    #[serde(default)]
    pub batch: Option<RawBatch>,
    pub dates: RawDates,
    #[serde(default)]
    pub env: serde_yaml::Mapping,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawConnection {
    pub url: String,
    #[serde(default = "default_auth_method")]
    pub auth_method: String,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub private_key_path: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawExecution {
    pub worker_script: String,
    pub num_partitions: i64,
    pub max_concurrent_sessions: i64,
    #[serde(default = "default_max_retries")]
    pub max_retries: i64,
    #[serde(default = "default_max_failures")]
    pub max_failures: i64,
    pub heap_size_gb: f64,
    #[serde(default = "default_language")]
    pub script_language: String,
    #[serde(default)]
    pub jvm_profile: Option<String>,
    #[serde(default)]
    pub server_name: Option<String>,
    #[serde(default = "one")]
    pub init_timeout_minutes: f64,
    #[serde(default = "one")]
    pub retry_delay_seconds: f64,
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_seconds: f64,
    #[serde(default)]
    pub retry_jitter: JitterPolicy,
    #[serde(default = "yes")]
    pub delete_successful_queries: bool,
    #[serde(default)]
    pub delete_failed_queries: bool,
    #[serde(default = "default_stall")]
    pub stall_iterations: i64,
    #[serde(default = "default_startup_stall")]
    pub startup_stall_iterations: i64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawReplay {
    pub replay_start: String,
    pub replay_speed: f64,
    #[serde(default = "yes")]
    pub sorted_replay: bool,
    #[serde(default)]
    pub buffer_rows: Option<i64>,
    #[serde(default)]
    pub replay_timestamp_columns: Vec<RawTimestampColumn>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawTimestampColumn {
    pub namespace: String,
    pub table: String,
    pub column: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawBatch {
    pub timeout_minutes: f64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawDates {
    pub start: String,
    pub end: String,
    #[serde(default)]
    pub weekdays_only: bool,
}

fn default_auth_method() -> String {
    "password".to_owned()
}

fn default_language() -> String {
    "Python".to_owned()
}

fn default_max_retries() -> i64 {
    3
}

fn default_max_failures() -> i64 {
    10
}

fn default_retry_max_delay() -> f64 {
    60.0
}

fn default_stall() -> i64 {
    10
}

fn default_startup_stall() -> i64 {
    30
}

fn one() -> f64 {
    1.0
}

fn yes() -> bool {
    true
}
