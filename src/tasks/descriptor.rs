//! # Session descriptors.
//!
//! A [`SessionDescriptor`] is everything a [`SessionClient`](crate::SessionClient)
//! needs to create one remote session for one [`Task`]. [`Blueprint`] holds the
//! run-wide parts and stamps out a descriptor per task.
//!
//! ## Naming
//! ```text
//! {mode}_{simulation}_{YYYYMMDD}_{partition}     e.g. replay_sim_20240103_7
//! ```
//!
//! ## Environment (in this order)
//! ```text
//! SIMULATION_NAME, SIMULATION_DATE, PARTITION_ID, NUM_PARTITIONS, QUERY_NAME, <user env...>
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ModeConfig, RunConfig, ScriptLanguage};

use super::task::Task;

/// Typed value of a mode-specific field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldValue {
    /// `{"type": "boolean"}`
    Bool(bool),
    /// `{"type": "string"}`
    Str(String),
}

/// Request to create one session.
#[derive(Clone, Debug)]
pub struct SessionDescriptor {
    /// Task this session executes.
    pub task: Task,
    /// Unique session name.
    pub name: String,
    /// `ReplayScript` or `RunAndDone`.
    pub configuration_type: &'static str,
    /// Session owner.
    pub owner: String,
    /// Target server.
    pub server_name: String,
    /// Worker heap in GB.
    pub heap_size_gb: f64,
    /// Worker interpreter.
    pub script_language: ScriptLanguage,
    /// JVM profile.
    pub jvm_profile: String,
    /// Bound on worker initialization.
    pub init_timeout: Duration,
    /// Worker script location.
    pub script_path: PathBuf,
    /// Worker script body.
    pub script: Arc<str>,
    /// Environment, required variables first.
    pub env: Vec<(String, String)>,
    /// Extra JVM arguments.
    pub jvm_args: Vec<String>,
    /// Mode-specific fields.
    pub fields: BTreeMap<&'static str, FieldValue>,
    /// Hard execution limit (batch only).
    pub timeout: Option<Duration>,
}

impl SessionDescriptor {
    /// Looks up an environment variable.
    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Run-wide template for [`SessionDescriptor`]s.
#[derive(Clone, Debug)]
pub struct Blueprint {
    cfg: Arc<RunConfig>,
    jvm_args: Vec<String>,
}

impl Blueprint {
    /// Captures the run config.
    pub fn new(cfg: Arc<RunConfig>) -> Self {
        let jvm_args = jvm_args(&cfg.mode);
        Self { cfg, jvm_args }
    }

    /// Session name for `task`.
    pub fn session_name(&self, task: &Task) -> String {
        format!(
            "{}_{}_{}_{}",
            task.mode,
            self.cfg.name,
            task.compact_date(),
            task.partition
        )
    }

    /// Builds the descriptor for `task`.
    pub fn describe(&self, task: &Task) -> SessionDescriptor {
        let cfg = &self.cfg;
        let exec = &cfg.execution;
        let name = self.session_name(task);
        let date = task.date.to_string();

        let mut env = Vec::with_capacity(5 + cfg.env.len());
        env.push(("SIMULATION_NAME".to_owned(), cfg.name.clone()));
        env.push(("SIMULATION_DATE".to_owned(), date.clone()));
        env.push(("PARTITION_ID".to_owned(), task.partition.to_string()));
        env.push(("NUM_PARTITIONS".to_owned(), exec.num_partitions.to_string()));
        env.push(("QUERY_NAME".to_owned(), name.clone()));
        env.extend(cfg.env.iter().cloned());

        let mut fields = BTreeMap::new();
        let (configuration_type, timeout) = match &cfg.mode {
            ModeConfig::Replay(r) => {
                fields.insert("ReplaySorted", FieldValue::Bool(r.sorted_replay));
                fields.insert(
                    "ReplayStart",
                    FieldValue::Str(r.replay_start.format("%H:%M:%S").to_string()),
                );
                fields.insert("ReplayDate", FieldValue::Str(date));
                fields.insert("ReplaySpeed", FieldValue::Str(speed_label(r.replay_speed)));
                ("ReplayScript", None)
            }
            ModeConfig::Batch(b) => {
                let minutes = b.timeout.as_secs_f64() / 60.0;
                fields.insert("TimeoutMinutes", FieldValue::Str(speed_label(minutes)));
                ("RunAndDone", Some(b.timeout))
            }
        };

        SessionDescriptor {
            task: *task,
            name,
            configuration_type,
            owner: cfg.connection.username.clone(),
            server_name: exec.server_name.clone(),
            heap_size_gb: exec.heap_size_gb,
            script_language: exec.script_language,
            jvm_profile: exec.jvm_profile.clone(),
            init_timeout: exec.init_timeout,
            script_path: exec.worker_script.clone(),
            script: Arc::clone(&exec.script),
            env,
            jvm_args: self.jvm_args.clone(),
            fields,
            timeout,
        }
    }
}

fn jvm_args(mode: &ModeConfig) -> Vec<String> {
    let ModeConfig::Replay(r) = mode else {
        return Vec::new();
    };
    let mut args = Vec::new();
    if let Some(rows) = r.buffer_rows {
        args.push(format!("-DReplayDatabase.BufferSize={rows}"));
    }
    if r.replay_speed > 1.0 {
        // speed <= 100 keeps this at or above 10ms.
        let cycle_ms = (1000.0 / r.replay_speed) as u64;
        args.push(format!(
            "-DPeriodicUpdateGraph.targetCycleDurationMillis={cycle_ms}"
        ));
    }
    for c in &r.timestamp_columns {
        args.push(format!(
            "-DReplayDatabase.TimestampColumn.{}.{}={}",
            c.namespace, c.table, c.column
        ));
    }
    args
}

/// `1.0` -> "1.0", `2.5` -> "2.5".
fn speed_label(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{v:.1}")
    } else {
        v.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_label_keeps_one_decimal() {
        assert_eq!(speed_label(1.0), "1.0");
        assert_eq!(speed_label(2.5), "2.5");
        assert_eq!(speed_label(60.0), "60.0");
    }
}
