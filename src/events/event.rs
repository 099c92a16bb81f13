//! # Lifecycle events emitted by the orchestrator.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Creation**: creating, created, failed, retry scheduled, abandoned
//! - **Execution**: status changes and the terminal outcome of a session
//! - **Run control**: stalls, failure limit, shutdown phases, run finished
//! - **Cleanup / subscribers**: deletions and subscriber health
//!
//! The [`Event`] struct carries the task, the session serial and name,
//! attempt numbers, retry delays and a human-readable reason.
//!
//! ## Ordering
//! [`Bus::publish`](crate::Bus::publish) numbers events per run, starting
//! at 1, in delivery order. An event that was never published has `seq == 0`.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use chrono::NaiveDate;
//! use pqvisor::{Event, EventKind, ModeTag, Task};
//!
//! let task = Task::new(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(), 3, ModeTag::Replay);
//! let ev = Event::new(EventKind::RetryScheduled)
//!     .with_task(task)
//!     .with_attempt(2)
//!     .with_delay(Duration::from_secs(2))
//!     .with_reason("connection reset");
//!
//! assert_eq!(ev.kind, EventKind::RetryScheduled);
//! assert_eq!(ev.task.map(|t| t.partition), Some(3));
//! assert_eq!(ev.delay_ms, Some(2000));
//! ```

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::tasks::Task;

/// Classification of orchestrator events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Creation ===
    /// A creation attempt is starting.
    ///
    /// Sets: `task`, `attempt` (1-based), `name`.
    SessionCreating,

    /// The platform accepted the session.
    ///
    /// Sets: `task`, `attempt`, `serial`, `name`.
    SessionCreated,

    /// A creation attempt failed (error, timeout or no capacity).
    ///
    /// Sets: `task`, `attempt`, `reason`.
    CreationFailed,

    /// The task goes back to the front of the queue after `delay_ms`.
    ///
    /// Sets: `task`, `attempt` (the next one), `delay_ms`, `reason`.
    RetryScheduled,

    /// The task will not be attempted again.
    ///
    /// Sets: `task`, `reason`.
    TaskAbandoned,

    // === Execution ===
    /// Non-terminal status reported for a session.
    ///
    /// Sets: `task`, `serial`, `reason` (status label).
    StatusChanged,

    /// Session finished successfully.
    ///
    /// Sets: `task`, `serial`, `name`.
    SessionCompleted,

    /// Session failed while executing.
    ///
    /// Sets: `task`, `serial`, `name`, `reason` (failure details).
    SessionFailed,

    /// Session failed because the platform had no capacity; it is deleted and retried.
    ///
    /// Sets: `task`, `serial`, `reason`.
    ResourceUnavailable,

    // === Run control ===
    /// No progress for the configured number of ticks.
    ///
    /// Sets: `reason` (snapshot), `attempt` (threshold hit).
    StallDetected,

    /// `max_failures` reached; admission stops.
    ///
    /// Sets: `reason`.
    FailureLimitReached,

    /// First interruption: draining.
    ///
    /// Sets: `reason` (snapshot).
    ShutdownRequested,

    /// Second interruption: active sessions are abandoned.
    ///
    /// Sets: `reason` (snapshot).
    ForcedTermination,

    /// All tasks reached a terminal bucket (or the run was cut short).
    ///
    /// Sets: `reason` (headline).
    RunFinished,

    // === Cleanup ===
    /// A session was deleted on the platform.
    ///
    /// Sets: `task`, `serial`, `name`.
    SessionDeleted,

    /// Deleting a session failed.
    ///
    /// Sets: `task`, `serial`, `name`, `reason`.
    DeleteFailed,

    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets: `name` (subscriber), `reason` (panic message).
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `name` (subscriber), `reason`.
    SubscriberOverflow,
}

/// Orchestrator event with optional metadata.
///
/// - `seq`: position in the run, stamped by the bus
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Per-run sequence number; 0 until published.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Task the event is about.
    pub task: Option<Task>,
    /// Platform serial of the session.
    pub serial: Option<u64>,
    /// Session name, or subscriber name for subscriber events.
    pub name: Option<Arc<str>>,
    /// Creation attempt (starting from 1).
    pub attempt: Option<u32>,
    /// Retry delay in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Human-readable reason (errors, status details, snapshots).
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates an unpublished event of the given kind, timestamped now.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: 0,
            at: SystemTime::now(),
            kind,
            task: None,
            serial: None,
            name: None,
            attempt: None,
            delay_ms: None,
            reason: None,
        }
    }

    /// Attaches the task.
    #[inline]
    pub fn with_task(mut self, task: Task) -> Self {
        self.task = Some(task);
        self
    }

    /// Attaches the session serial.
    #[inline]
    pub fn with_serial(mut self, serial: u64) -> Self {
        self.serial = Some(serial);
        self
    }

    /// Attaches a session (or subscriber) name.
    #[inline]
    pub fn with_name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attaches an attempt count.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a retry delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.delay_ms = Some(ms);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Creates a subscriber overflow event.
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_name(subscriber)
            .with_reason(reason)
    }

    /// Creates a subscriber panic event.
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_name(subscriber)
            .with_reason(info)
    }

    /// True for events about subscribers rather than tasks.
    #[inline]
    pub fn is_subscriber_trouble(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked
        )
    }
}
