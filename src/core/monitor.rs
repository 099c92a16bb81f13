//! # Status monitor.
//!
//! Two pieces used by the control loop:
//! - [`classify`] maps a pushed [`SessionStatus`] to what the loop does next.
//! - [`StallDetector`] counts control-loop ticks without any state transition
//!   and reports when a threshold is hit.
//!
//! ## Classification
//! ```text
//! Completed | Stopped                           -> Completed
//! Failed { details } with a capacity marker     -> ResourceUnavailable
//! Failed { details }                            -> FailedExecution
//! Initializing | AcquiringWorker | Running      -> Pending
//! ```

use crate::client::SessionStatus;

/// Failure details that mean "the platform had no capacity", not "the worker
/// failed".
pub const RESOURCE_UNAVAILABLE_MARKERS: [&str; 4] = [
    "ResourcesUnavailableException",
    "Unable to find available server",
    "Unable to determine dispatcher",
    "No dispatcher resources available",
];

/// What a status means for the task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Classification {
    /// Terminal success.
    Completed,
    /// Terminal failure of the worker.
    FailedExecution {
        /// Platform details.
        details: String,
    },
    /// Terminal failure caused by missing capacity; retried as a creation failure.
    ResourceUnavailable {
        /// Platform details.
        details: String,
    },
    /// Not terminal yet.
    Pending,
}

/// Classifies a status update.
///
/// # Example
/// ```
/// use pqvisor::{Classification, SessionStatus, classify};
///
/// assert_eq!(classify(&SessionStatus::Stopped), Classification::Completed);
/// assert_eq!(classify(&SessionStatus::Running), Classification::Pending);
/// ```
pub fn classify(status: &SessionStatus) -> Classification {
    match status {
        SessionStatus::Completed | SessionStatus::Stopped => Classification::Completed,
        SessionStatus::Failed { details } if is_resource_unavailable(details) => {
            Classification::ResourceUnavailable {
                details: details.clone(),
            }
        }
        SessionStatus::Failed { details } => Classification::FailedExecution {
            details: details.clone(),
        },
        SessionStatus::Initializing | SessionStatus::AcquiringWorker | SessionStatus::Running => {
            Classification::Pending
        }
    }
}

fn is_resource_unavailable(details: &str) -> bool {
    RESOURCE_UNAVAILABLE_MARKERS
        .iter()
        .any(|m| details.contains(m))
}

/// Counts idle control-loop ticks.
///
/// Until the first terminal outcome the run is in its startup phase and uses
/// the (usually higher) startup threshold. Hitting a threshold reports it and
/// starts counting again from zero; any transition resets the count.
#[derive(Clone, Debug)]
pub struct StallDetector {
    threshold: u32,
    startup_threshold: u32,
    startup: bool,
    idle: u32,
}

impl StallDetector {
    /// Creates a detector; a threshold of `0` disables that phase.
    pub fn new(threshold: u32, startup_threshold: u32) -> Self {
        Self {
            threshold,
            startup_threshold,
            startup: true,
            idle: 0,
        }
    }

    /// A state transition was observed.
    pub fn transition(&mut self) {
        self.idle = 0;
    }

    /// A session reached a terminal state; the startup phase is over.
    pub fn terminal(&mut self) {
        self.startup = false;
        self.idle = 0;
    }

    /// True until the first terminal outcome.
    pub fn in_startup(&self) -> bool {
        self.startup
    }

    /// One idle tick. Returns the threshold if it was just reached.
    pub fn tick(&mut self) -> Option<u32> {
        let threshold = if self.startup {
            self.startup_threshold
        } else {
            self.threshold
        };
        if threshold == 0 {
            return None;
        }
        self.idle += 1;
        if self.idle >= threshold {
            self.idle = 0;
            Some(threshold)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert_eq!(classify(&SessionStatus::Completed), Classification::Completed);
        assert_eq!(
            classify(&SessionStatus::AcquiringWorker),
            Classification::Pending
        );
        assert_eq!(
            classify(&SessionStatus::Failed {
                details: "NameError: x".into()
            }),
            Classification::FailedExecution {
                details: "NameError: x".into()
            }
        );
        let capacity = "io.deephaven.ResourcesUnavailableException: Unable to find available server";
        assert!(matches!(
            classify(&SessionStatus::Failed {
                details: capacity.into()
            }),
            Classification::ResourceUnavailable { .. }
        ));
        assert!(matches!(
            classify(&SessionStatus::Failed {
                details: "No dispatcher resources available for pool".into()
            }),
            Classification::ResourceUnavailable { .. }
        ));
    }

    #[test]
    fn startup_threshold_until_first_terminal() {
        let mut d = StallDetector::new(2, 3);
        assert_eq!(d.tick(), None);
        assert_eq!(d.tick(), None);
        assert_eq!(d.tick(), Some(3));
        // Counter restarts after a warning.
        assert_eq!(d.tick(), None);

        d.terminal();
        assert!(!d.in_startup());
        assert_eq!(d.tick(), None);
        assert_eq!(d.tick(), Some(2));
    }

    #[test]
    fn transitions_reset_the_count() {
        let mut d = StallDetector::new(2, 2);
        d.terminal();
        assert_eq!(d.tick(), None);
        d.transition();
        assert_eq!(d.tick(), None);
        assert_eq!(d.tick(), Some(2));
    }

    #[test]
    fn zero_threshold_disables() {
        let mut d = StallDetector::new(0, 0);
        for _ in 0..100 {
            assert_eq!(d.tick(), None);
        }
    }
}
