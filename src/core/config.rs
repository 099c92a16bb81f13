//! # Orchestrator configuration.
//!
//! [`OrchestratorConfig`] gathers the runtime knobs of the control loop. The
//! binary derives it from a [`RunConfig`] with [`OrchestratorConfig::from_run`];
//! tests build it directly.
//!
//! ## Sentinel values
//! - `max_failures = 0` → unlimited (the loop never stops on failures)
//! - `init_timeout = 0s` → creation attempts are not time-bounded
//! - `stall_iterations = 0` → stall detection off

use std::time::Duration;

use crate::config::RunConfig;
use crate::policies::RetryPolicy;

/// Runtime settings for [`Orchestrator`](crate::Orchestrator).
///
/// ## Field semantics
/// - `max_concurrent`: sessions creating or active at once (min 1)
/// - `retry`: retry budget and backoff for failed creation
/// - `max_failures`: failed tasks before admission stops (`0` = unlimited)
/// - `init_timeout`: bound on one `create` call (`0s` = none)
/// - `tick`: stall detector period
/// - `grace`: time allowed for deletions after a forced termination
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Maximum sessions in `Creating` or `Active` at the same time.
    pub max_concurrent: usize,

    /// Retry policy for failed creation attempts.
    pub retry: RetryPolicy,

    /// Failed tasks (execution failures plus tasks whose creation gave up)
    /// after which admission stops and the run drains.
    ///
    /// `0` = unlimited.
    pub max_failures: u32,

    /// Bound on a single creation attempt.
    pub init_timeout: Duration,

    /// Control-loop tick; drives stall detection.
    pub tick: Duration,

    /// Idle ticks before a stall warning (`0` = off).
    pub stall_iterations: u32,

    /// Idle ticks before a stall warning until the first terminal outcome.
    pub startup_stall_iterations: u32,

    /// Time allowed for deleting sessions after a forced termination.
    pub grace: Duration,

    /// Delete sessions that completed once the run is over.
    pub delete_successful: bool,

    /// Delete sessions that failed once the run is over.
    pub delete_failed: bool,

    /// Deletions in flight during cleanup.
    pub cleanup_concurrency: usize,

    /// Capacity of the event bus ring buffer.
    pub bus_capacity: usize,

    /// Capacity of the control loop's inbound channel.
    pub inbound_capacity: usize,

    /// Listen for SIGINT/SIGTERM/SIGQUIT (Ctrl-C elsewhere).
    pub handle_os_signals: bool,
}

impl OrchestratorConfig {
    /// Derives the runtime settings from a validated run configuration.
    pub fn from_run(cfg: &RunConfig) -> Self {
        let exec = &cfg.execution;
        Self {
            max_concurrent: exec.max_concurrent_sessions as usize,
            retry: cfg.retry_policy(),
            max_failures: exec.max_failures,
            init_timeout: exec.init_timeout,
            stall_iterations: exec.stall_iterations,
            startup_stall_iterations: exec.startup_stall_iterations,
            delete_successful: exec.delete_successful,
            delete_failed: exec.delete_failed,
            handle_os_signals: true,
            ..Self::default()
        }
    }

    /// Failure limit as an `Option` (`None` = unlimited).
    #[inline]
    pub fn failure_limit(&self) -> Option<u32> {
        if self.max_failures == 0 {
            None
        } else {
            Some(self.max_failures)
        }
    }

    /// Creation timeout as an `Option` (`None` = unbounded).
    #[inline]
    pub fn creation_timeout(&self) -> Option<Duration> {
        if self.init_timeout.is_zero() {
            None
        } else {
            Some(self.init_timeout)
        }
    }

    /// Concurrency bound clamped to a minimum of 1.
    #[inline]
    pub fn max_concurrent_clamped(&self) -> usize {
        self.max_concurrent.max(1)
    }
}

impl Default for OrchestratorConfig {
    /// Default configuration:
    ///
    /// - `max_concurrent = 1`
    /// - `retry = RetryPolicy::default()` (3 retries, 1s doubling to 60s)
    /// - `max_failures = 10`
    /// - `init_timeout = 60s`, `tick = 1s`, `grace = 30s`
    /// - stall warnings after 10 idle ticks (30 during startup)
    /// - completed sessions deleted, failed ones kept
    /// - OS signals not handled (the binary turns them on)
    fn default() -> Self {
        Self {
            max_concurrent: 1,
            retry: RetryPolicy::default(),
            max_failures: 10,
            init_timeout: Duration::from_secs(60),
            tick: Duration::from_secs(1),
            stall_iterations: 10,
            startup_stall_iterations: 30,
            grace: Duration::from_secs(30),
            delete_successful: true,
            delete_failed: false,
            cleanup_concurrency: 8,
            bus_capacity: 1024,
            inbound_capacity: 1024,
            handle_os_signals: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels() {
        let mut cfg = OrchestratorConfig::default();
        assert_eq!(cfg.failure_limit(), Some(10));
        assert_eq!(cfg.creation_timeout(), Some(Duration::from_secs(60)));

        cfg.max_failures = 0;
        cfg.init_timeout = Duration::ZERO;
        cfg.max_concurrent = 0;
        assert_eq!(cfg.failure_limit(), None);
        assert_eq!(cfg.creation_timeout(), None);
        assert_eq!(cfg.max_concurrent_clamped(), 1);
    }
}
