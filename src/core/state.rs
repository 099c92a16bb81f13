//! Run-wide counters and per-session records.
//!
//! Both are owned by the control loop; nothing else mutates them.

use std::time::Instant;

use crate::client::{SessionHandle, SessionStatus};
use crate::tasks::Task;

/// Where a session is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SessionState {
    /// `create` is in flight.
    Creating,
    /// Created and subscribed; waiting for a terminal status.
    Active,
}

/// One remote execution attempt of a task.
#[derive(Clone, Debug)]
pub(crate) struct Session {
    pub task: Task,
    pub handle: Option<SessionHandle>,
    pub state: SessionState,
    pub retry_count: u32,
    pub created_at: Instant,
    pub last_status: Option<SessionStatus>,
}

impl Session {
    pub fn creating(task: Task, retry_count: u32) -> Self {
        Self {
            task,
            handle: None,
            state: SessionState::Creating,
            retry_count,
            created_at: Instant::now(),
            last_status: None,
        }
    }

    /// Creation attempt number (1-based).
    pub fn attempt(&self) -> u32 {
        self.retry_count + 1
    }
}

/// Counters for one run.
///
/// Every task ends in exactly one of `completed`, `failed_execution` or
/// `abandoned`; `failed_creation` counts the abandoned tasks whose creation
/// never succeeded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunState {
    /// Tasks generated for the run.
    pub total: usize,
    /// Sessions the platform accepted.
    pub created: usize,
    /// Tasks whose session completed.
    pub completed: usize,
    /// Tasks abandoned after creation kept failing.
    pub failed_creation: usize,
    /// Tasks whose session failed while executing.
    pub failed_execution: usize,
    /// Tasks that will never run again (includes `failed_creation`).
    pub abandoned: usize,
    /// Individual creation attempts that failed.
    pub creation_errors: usize,
    /// Stall warnings emitted.
    pub stalls: usize,
    /// Admission stopped (signal or failure limit).
    pub shutting_down: bool,
}

impl RunState {
    pub(crate) fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    /// Tasks in a terminal bucket.
    pub fn terminal(&self) -> usize {
        self.completed + self.failed_execution + self.abandoned
    }

    /// Failures counted against `max_failures`.
    pub fn failures(&self) -> usize {
        self.failed_execution + self.failed_creation
    }

    pub(crate) fn snapshot(&self, pending: usize, active: usize) -> String {
        format!(
            "pending={pending} active={active} completed={} failed={} abandoned={}",
            self.completed, self.failed_execution, self.abandoned
        )
    }
}
