//! Error types used by the orchestrator, the session clients and the config loader.
//!
//! This module defines four enums:
//!
//! - [`RuntimeError`]: errors raised by the control loop itself (exit code 4).
//! - [`SessionError`]: errors raised while creating or subscribing to a remote session.
//! - [`ConfigError`]: errors raised while loading and validating the run configuration.
//! - [`TaskGenError`]: invalid task generator input.
//!
//! All of them provide `as_label` for logs and [`SessionError::is_retryable`]
//! tells the retry policy which creation failures are worth another attempt.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// # Errors produced by the orchestration runtime.
///
/// These abort the control loop before every task reached a terminal bucket.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The inbound event channel closed while work was still outstanding.
    #[error("inbound event channel closed with {outstanding} task(s) outstanding")]
    InboundClosed {
        /// Number of tasks still pending or active.
        outstanding: usize,
    },

    /// OS signal handlers could not be installed.
    #[error("failed to install signal handlers: {0}")]
    Signal(#[from] std::io::Error),

    /// Task generation failed.
    #[error(transparent)]
    TaskGen(#[from] TaskGenError),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use pqvisor::RuntimeError;
    ///
    /// let err = RuntimeError::InboundClosed { outstanding: 3 };
    /// assert_eq!(err.as_label(), "runtime_inbound_closed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::InboundClosed { .. } => "runtime_inbound_closed",
            RuntimeError::Signal(_) => "runtime_signal",
            RuntimeError::TaskGen(_) => "runtime_task_gen",
        }
    }
}

/// # Errors produced by a session creation attempt.
///
/// Retryable errors (`Timeout`, `Fail`) go through the retry policy,
/// `Fatal` abandons the task on the spot.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Creation did not finish within the init timeout.
    #[error("creation timed out after {timeout:?}")]
    Timeout {
        /// The timeout that was exceeded.
        timeout: Duration,
    },

    /// Creation failed but may succeed on another attempt.
    #[error("creation failed: {reason}")]
    Fail {
        /// The underlying error message.
        reason: String,
    },

    /// Non-recoverable error; retrying would not help.
    #[error("fatal error (no retry): {reason}")]
    Fatal {
        /// The underlying error message.
        reason: String,
    },

    /// The attempt was cancelled because the run is terminating.
    #[error("creation cancelled")]
    Canceled,
}

impl SessionError {
    /// Shorthand for a retryable failure.
    pub fn fail(reason: impl Into<String>) -> Self {
        SessionError::Fail {
            reason: reason.into(),
        }
    }

    /// Shorthand for a fatal failure.
    pub fn fatal(reason: impl Into<String>) -> Self {
        SessionError::Fatal {
            reason: reason.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use pqvisor::SessionError;
    /// use std::time::Duration;
    ///
    /// let err = SessionError::Timeout { timeout: Duration::from_secs(60) };
    /// assert_eq!(err.as_label(), "session_timeout");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            SessionError::Timeout { .. } => "session_timeout",
            SessionError::Fail { .. } => "session_failed",
            SessionError::Fatal { .. } => "session_fatal",
            SessionError::Canceled => "session_canceled",
        }
    }

    /// Indicates whether another creation attempt may succeed.
    ///
    /// Returns `true` for [`SessionError::Fail`] and [`SessionError::Timeout`].
    ///
    /// # Example
    /// ```
    /// use pqvisor::SessionError;
    ///
    /// assert!(SessionError::fail("connection reset").is_retryable());
    /// assert!(!SessionError::fatal("bad script").is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::Fail { .. } | SessionError::Timeout { .. })
    }
}

/// # Errors produced while loading the configuration document.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The document is not valid YAML or does not match the schema
    /// (unknown or missing fields, wrong types).
    #[error("invalid config document: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A field holds a value outside its allowed domain.
    #[error("{field}: {reason}")]
    Invalid {
        /// Dotted path of the offending field, e.g. `execution.num_partitions`.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// A `${VAR}` reference names a variable that is not set.
    #[error("{field}: environment variable not set: {var}")]
    MissingEnv {
        /// Field holding the reference.
        field: String,
        /// Name of the missing variable.
        var: String,
    },

    /// The worker script does not exist or is not a regular file.
    #[error("worker script not found: {0}")]
    WorkerScript(PathBuf),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::Io { .. } => "config_io",
            ConfigError::Parse(_) => "config_parse",
            ConfigError::Invalid { .. } => "config_invalid",
            ConfigError::MissingEnv { .. } => "config_missing_env",
            ConfigError::WorkerScript(_) => "config_worker_script",
        }
    }
}

/// # Invalid input to the task generator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskGenError {
    /// The start date lies after the end date.
    #[error("start date {start} is after end date {end}")]
    InvertedRange {
        /// Configured start.
        start: chrono::NaiveDate,
        /// Configured end.
        end: chrono::NaiveDate,
    },

    /// `num_partitions` lies outside `[1, 1000]`.
    #[error("num_partitions must be within [1, {max}] (got {got})")]
    Partitions {
        /// Requested partition count.
        got: u32,
        /// Upper bound.
        max: u32,
    },
}
