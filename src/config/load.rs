//! Loading: read -> expand `${VAR}` -> deserialize -> validate.
//!
//! All checks run before the orchestrator sees the config; the first failing
//! field is reported as `<section>.<field>: <reason>`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime};
use serde_yaml::Value;

use crate::error::ConfigError;
use crate::tasks::MAX_PARTITIONS;

use super::document::{RawConfig, RawConnection, RawDates, RawExecution, RawReplay};
use super::model::{
    Auth, BatchConfig, ConnectionConfig, DateRange, ExecutionConfig, ModeConfig, ReplayConfig,
    RunConfig, ScriptLanguage, TimestampColumn,
};

const MAX_CONCURRENT: i64 = 1000;
const MAX_HEAP_GB: f64 = 512.0;
const MIN_SPEED: f64 = 1.0;
const MAX_SPEED: f64 = 100.0;

impl RunConfig {
    /// Loads and validates the config file at `path`.
    ///
    /// `${VAR}` values are taken from the process environment; the worker
    /// script is resolved relative to the config file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_yaml_str(&text, base)
    }

    /// Parses a document held in memory, expanding from the process environment.
    pub fn from_yaml_str(yaml: &str, base_dir: &Path) -> Result<Self, ConfigError> {
        Self::from_yaml_with_env(yaml, base_dir, |var| std::env::var(var).ok())
    }

    /// Parses a document, resolving `${VAR}` through `lookup`.
    pub fn from_yaml_with_env<F>(yaml: &str, base_dir: &Path, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut doc: Value = serde_yaml::from_str(yaml)?;
        expand_env(&mut doc, "", &lookup)?;
        let raw: RawConfig = serde_yaml::from_value(doc)?;
        validate(raw, base_dir)
    }
}

/// Replaces every string value of the exact form `${VAR}`.
fn expand_env<F>(value: &mut Value, path: &str, lookup: &F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match value {
        Value::String(s) => {
            if let Some(var) = s.strip_prefix("${").and_then(|r| r.strip_suffix('}')) {
                let resolved = lookup(var).ok_or_else(|| ConfigError::MissingEnv {
                    field: path.to_owned(),
                    var: var.to_owned(),
                })?;
                *s = resolved;
            }
        }
        Value::Mapping(map) => {
            for (k, v) in map.iter_mut() {
                let key = k.as_str().unwrap_or("?");
                let child = if path.is_empty() {
                    key.to_owned()
                } else {
                    format!("{path}.{key}")
                };
                expand_env(v, &child, lookup)?;
            }
        }
        Value::Sequence(seq) => {
            for (i, v) in seq.iter_mut().enumerate() {
                expand_env(v, &format!("{path}[{i}]"), lookup)?;
            }
        }
        Value::Tagged(tagged) => expand_env(&mut tagged.value, path, lookup)?,
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
    Ok(())
}

fn validate(raw: RawConfig, base_dir: &Path) -> Result<RunConfig, ConfigError> {
    let name = non_empty("name", raw.name)?;
    let connection = connection(raw.connection)?;
    let execution = execution(raw.execution, base_dir)?;
    let mode = match (raw.replay, raw.batch) {
        (Some(r), None) => ModeConfig::Replay(replay(r)?),
        (None, Some(b)) => {
            let timeout = minutes("batch.timeout_minutes", b.timeout_minutes)?;
            ModeConfig::Batch(BatchConfig { timeout })
        }
        (Some(_), Some(_)) => {
            return Err(ConfigError::invalid(
                "replay",
                "`replay` and `batch` are mutually exclusive",
            ));
        }
        (None, None) => {
            return Err(ConfigError::invalid(
                "replay",
                "one of `replay` or `batch` is required",
            ));
        }
    };
    let dates = dates(raw.dates)?;
    let env = env(raw.env)?;

    Ok(RunConfig {
        name,
        connection,
        execution,
        mode,
        dates,
        env,
    })
}

fn connection(raw: RawConnection) -> Result<ConnectionConfig, ConfigError> {
    let url = non_empty("connection.url", raw.url)?;
    let username = non_empty("connection.username", raw.username)?;
    let auth = match raw.auth_method.as_str() {
        "password" => Auth::Password {
            password: raw.password.filter(|p| !p.is_empty()).ok_or_else(|| {
                ConfigError::invalid(
                    "connection.password",
                    "required (non-empty) when auth_method is 'password'",
                )
            })?,
        },
        "private_key" => {
            let path = raw
                .private_key_path
                .filter(|p| !p.trim().is_empty())
                .ok_or_else(|| {
                    ConfigError::invalid(
                        "connection.private_key_path",
                        "required when auth_method is 'private_key'",
                    )
                })?;
            Auth::PrivateKey { path: path.into() }
        }
        other => {
            return Err(ConfigError::invalid(
                "connection.auth_method",
                format!("must be 'password' or 'private_key' (got '{other}')"),
            ));
        }
    };
    Ok(ConnectionConfig {
        url,
        username,
        auth,
    })
}

fn execution(raw: RawExecution, base_dir: &Path) -> Result<ExecutionConfig, ConfigError> {
    let script_ref = non_empty("execution.worker_script", raw.worker_script)?;
    let worker_script = base_dir.join(script_ref);
    if !worker_script.is_file() {
        return Err(ConfigError::WorkerScript(worker_script));
    }
    let script: Arc<str> = std::fs::read_to_string(&worker_script)
        .map_err(|source| ConfigError::Io {
            path: worker_script.clone(),
            source,
        })?
        .into();

    let num_partitions = bounded(
        "execution.num_partitions",
        raw.num_partitions,
        1,
        i64::from(MAX_PARTITIONS),
    )?;
    let max_concurrent_sessions = bounded(
        "execution.max_concurrent_sessions",
        raw.max_concurrent_sessions,
        1,
        MAX_CONCURRENT,
    )?;
    let max_retries = bounded(
        "execution.max_retries",
        raw.max_retries,
        0,
        i64::from(u32::MAX),
    )?;
    let max_failures = bounded(
        "execution.max_failures",
        raw.max_failures,
        0,
        i64::from(u32::MAX),
    )?;

    let heap = raw.heap_size_gb;
    if !heap.is_finite() || heap <= 0.0 {
        return Err(ConfigError::invalid(
            "execution.heap_size_gb",
            format!("must be > 0 (got {heap})"),
        ));
    }
    if heap > MAX_HEAP_GB {
        return Err(ConfigError::invalid(
            "execution.heap_size_gb",
            format!("too high (got {heap}, max {MAX_HEAP_GB})"),
        ));
    }

    let script_language = match raw.script_language.as_str() {
        "Python" => ScriptLanguage::Python,
        "Groovy" => ScriptLanguage::Groovy,
        other => {
            return Err(ConfigError::invalid(
                "execution.script_language",
                format!("must be 'Python' or 'Groovy' (got '{other}')"),
            ));
        }
    };
    let jvm_profile = non_empty(
        "execution.jvm_profile",
        raw.jvm_profile.unwrap_or_else(|| "Default".to_owned()),
    )?;
    let server_name = non_empty(
        "execution.server_name",
        raw.server_name.unwrap_or_else(|| "AutoQuery".to_owned()),
    )?;

    let init_timeout = minutes("execution.init_timeout_minutes", raw.init_timeout_minutes)?;
    let retry_delay = seconds("execution.retry_delay_seconds", raw.retry_delay_seconds)?;
    let retry_max_delay = seconds(
        "execution.retry_max_delay_seconds",
        raw.retry_max_delay_seconds,
    )?;
    if retry_max_delay < retry_delay {
        return Err(ConfigError::invalid(
            "execution.retry_max_delay_seconds",
            format!(
                "must be >= retry_delay_seconds (got {} < {})",
                raw.retry_max_delay_seconds, raw.retry_delay_seconds
            ),
        ));
    }

    let stall_iterations = bounded(
        "execution.stall_iterations",
        raw.stall_iterations,
        1,
        i64::from(u32::MAX),
    )?;
    let startup_stall_iterations = bounded(
        "execution.startup_stall_iterations",
        raw.startup_stall_iterations,
        1,
        i64::from(u32::MAX),
    )?;

    Ok(ExecutionConfig {
        worker_script,
        script,
        num_partitions,
        max_concurrent_sessions,
        max_retries,
        max_failures,
        heap_size_gb: heap,
        script_language,
        jvm_profile,
        server_name,
        init_timeout,
        retry_delay,
        retry_max_delay,
        retry_jitter: raw.retry_jitter,
        delete_successful: raw.delete_successful_queries,
        delete_failed: raw.delete_failed_queries,
        stall_iterations,
        startup_stall_iterations,
    })
}

fn replay(raw: RawReplay) -> Result<ReplayConfig, ConfigError> {
    let replay_start = NaiveTime::parse_from_str(&raw.replay_start, "%H:%M:%S").map_err(|_| {
        ConfigError::invalid(
            "replay.replay_start",
            format!("must be in HH:MM:SS format (got '{}')", raw.replay_start),
        )
    })?;

    let speed = raw.replay_speed;
    if !speed.is_finite() || speed < MIN_SPEED {
        return Err(ConfigError::invalid(
            "replay.replay_speed",
            format!("must be >= {MIN_SPEED} (got {speed})"),
        ));
    }
    if speed > MAX_SPEED {
        return Err(ConfigError::invalid(
            "replay.replay_speed",
            format!("too high (got {speed}, max {MAX_SPEED})"),
        ));
    }

    let buffer_rows = match raw.buffer_rows {
        Some(n) if n <= 0 => {
            return Err(ConfigError::invalid(
                "replay.buffer_rows",
                format!("must be > 0 (got {n})"),
            ));
        }
        Some(n) => Some(n as u64),
        None => None,
    };

    let mut timestamp_columns = Vec::with_capacity(raw.replay_timestamp_columns.len());
    for (idx, c) in raw.replay_timestamp_columns.into_iter().enumerate() {
        for (key, value) in [
            ("namespace", &c.namespace),
            ("table", &c.table),
            ("column", &c.column),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::invalid(
                    "replay.replay_timestamp_columns",
                    format!("[{idx}].{key} must be a non-empty string"),
                ));
            }
        }
        timestamp_columns.push(TimestampColumn {
            namespace: c.namespace,
            table: c.table,
            column: c.column,
        });
    }

    Ok(ReplayConfig {
        replay_start,
        replay_speed: speed,
        sorted_replay: raw.sorted_replay,
        buffer_rows,
        timestamp_columns,
    })
}

fn dates(raw: RawDates) -> Result<DateRange, ConfigError> {
    let start = date("dates.start", &raw.start)?;
    let end = date("dates.end", &raw.end)?;
    if end < start {
        return Err(ConfigError::invalid(
            "dates.end",
            format!("({end}) must be >= dates.start ({start})"),
        ));
    }
    Ok(DateRange {
        start,
        end,
        weekdays_only: raw.weekdays_only,
    })
}

fn env(raw: serde_yaml::Mapping) -> Result<Vec<(String, String)>, ConfigError> {
    let mut out = Vec::with_capacity(raw.len());
    for (k, v) in raw {
        let key = match k {
            Value::String(s) if !s.trim().is_empty() => s,
            other => {
                return Err(ConfigError::invalid(
                    "env",
                    format!("keys must be non-empty strings (got {other:?})"),
                ));
            }
        };
        let value = match v {
            Value::String(s) => s,
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            other => {
                return Err(ConfigError::invalid(
                    "env",
                    format!("{key}: value must be a scalar (got {other:?})"),
                ));
            }
        };
        out.push((key, value));
    }
    Ok(out)
}

fn non_empty(field: &'static str, value: String) -> Result<String, ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::invalid(field, "must be a non-empty string"));
    }
    Ok(value)
}

fn bounded(field: &'static str, value: i64, min: i64, max: i64) -> Result<u32, ConfigError> {
    if value < min {
        return Err(ConfigError::invalid(
            field,
            format!("must be >= {min} (got {value})"),
        ));
    }
    if value > max {
        return Err(ConfigError::invalid(
            field,
            format!("too high (got {value}, max {max})"),
        ));
    }
    u32::try_from(value).map_err(|_| ConfigError::invalid(field, format!("out of range ({value})")))
}

fn minutes(field: &'static str, value: f64) -> Result<Duration, ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::invalid(
            field,
            format!("must be > 0 (got {value})"),
        ));
    }
    duration(field, value * 60.0)
}

fn seconds(field: &'static str, value: f64) -> Result<Duration, ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::invalid(
            field,
            format!("must be >= 0 (got {value})"),
        ));
    }
    duration(field, value)
}

fn duration(field: &'static str, secs: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(secs)
        .map_err(|e| ConfigError::invalid(field, format!("out of range ({e})")))
}

fn date(field: &'static str, value: &str) -> Result<NaiveDate, ConfigError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|e| {
        ConfigError::invalid(field, format!("must be in YYYY-MM-DD format: {e}"))
    })
}
