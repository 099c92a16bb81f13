//! Messages into the control loop.
//!
//! Everything that happens off-loop (creation calls, subscriptions, retry
//! timers, client status pushes) reports back through one bounded channel of
//! [`Inbound`]; the loop is the only place run state changes.

use crate::client::{SessionHandle, StatusUpdate};
use crate::error::SessionError;
use crate::tasks::Task;

#[derive(Debug)]
pub(crate) enum Inbound {
    /// A creation attempt finished.
    Created {
        task: Task,
        result: Result<SessionHandle, SessionError>,
    },
    /// Subscribing to a created session failed.
    SubscribeFailed {
        task: Task,
        serial: u64,
        error: SessionError,
    },
    /// Status pushed by the client.
    Status(StatusUpdate),
    /// A retry delay elapsed; the task may be admitted again.
    RetryDue { task: Task },
}
