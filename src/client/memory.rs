//! # In-memory scripted platform.
//!
//! [`MemoryClient`] plays the remote platform in tests and in demos. Each
//! creation attempt for a task consumes one [`Behavior`] from that task's
//! script (the last entry repeats forever); tasks without a script use the
//! default behavior.
//!
//! A behavior decides how `create` answers and, on success, which statuses
//! the session reports and when:
//!
//! ```text
//! Behavior::complete_after(1s)              Running ──1s──► Completed
//! Behavior::fail_after(1s, "boom")          Running ──1s──► Failed{boom}
//! Behavior::reject("no capacity")           create -> Err(Fail)
//! Behavior::hang()                          Running (forever)
//! ```
//!
//! Everything the orchestrator does is recorded: attempts per task, created
//! and deleted sessions, and the peak number of sessions that were creating
//! or live at once.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;

use super::{SessionClient, SessionHandle, SessionStatus, StatusSink};
use crate::error::SessionError;
use crate::tasks::{SessionDescriptor, Task};

/// Marker the platform puts in failures caused by missing capacity.
const NO_CAPACITY: &str = "ResourcesUnavailableException: Unable to find available server";

/// How `create` answers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    /// Session is created.
    Succeed,
    /// Retryable failure.
    Fail(String),
    /// Permanent failure.
    Fatal(String),
}

/// Scripted behavior of one creation attempt.
#[derive(Clone, Debug)]
pub struct Behavior {
    /// Answer to `create`.
    pub create: CreateOutcome,
    /// Time `create` takes before answering.
    pub create_delay: Duration,
    /// Statuses after subscription, each delay relative to the previous one.
    pub timeline: Vec<(Duration, SessionStatus)>,
}

impl Behavior {
    /// Runs for `d`, then completes.
    pub fn complete_after(d: Duration) -> Self {
        Self::with_timeline(vec![
            (Duration::ZERO, SessionStatus::Running),
            (d, SessionStatus::Completed),
        ])
    }

    /// Runs for `d`, then fails with `details`.
    pub fn fail_after(d: Duration, details: impl Into<String>) -> Self {
        Self::with_timeline(vec![
            (Duration::ZERO, SessionStatus::Running),
            (
                d,
                SessionStatus::Failed {
                    details: details.into(),
                },
            ),
        ])
    }

    /// Fails after `d` because the platform has no worker capacity.
    pub fn resource_unavailable_after(d: Duration) -> Self {
        Self::with_timeline(vec![
            (Duration::ZERO, SessionStatus::AcquiringWorker),
            (
                d,
                SessionStatus::Failed {
                    details: NO_CAPACITY.to_owned(),
                },
            ),
        ])
    }

    /// Runs and never reaches a terminal status.
    pub fn hang() -> Self {
        Self::with_timeline(vec![(Duration::ZERO, SessionStatus::Running)])
    }

    /// `create` fails with a retryable error.
    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            create: CreateOutcome::Fail(reason.into()),
            create_delay: Duration::ZERO,
            timeline: Vec::new(),
        }
    }

    /// `create` fails permanently.
    pub fn reject_fatal(reason: impl Into<String>) -> Self {
        Self {
            create: CreateOutcome::Fatal(reason.into()),
            create_delay: Duration::ZERO,
            timeline: Vec::new(),
        }
    }

    /// Sets how long `create` takes.
    pub fn with_create_delay(mut self, d: Duration) -> Self {
        self.create_delay = d;
        self
    }

    fn with_timeline(timeline: Vec<(Duration, SessionStatus)>) -> Self {
        Self {
            create: CreateOutcome::Succeed,
            create_delay: Duration::ZERO,
            timeline,
        }
    }
}

impl Default for Behavior {
    /// Completes after one second.
    fn default() -> Self {
        Behavior::complete_after(Duration::from_secs(1))
    }
}

type TaskKey = (NaiveDate, u32);

fn key(task: &Task) -> TaskKey {
    (task.date, task.partition)
}

struct Session {
    name: Arc<str>,
    timeline: Vec<(Duration, SessionStatus)>,
    token: CancellationToken,
    live: bool,
}

#[derive(Default)]
struct State {
    scripts: HashMap<TaskKey, VecDeque<Behavior>>,
    attempts: HashMap<TaskKey, u32>,
    sessions: HashMap<u64, Session>,
    created: Vec<String>,
    deleted: Vec<String>,
    failing_deletes: bool,
    live: usize,
    peak: usize,
}

impl State {
    fn next_behavior(&mut self, task: &Task, default: &Behavior) -> Behavior {
        match self.scripts.get_mut(&key(task)) {
            Some(q) if q.len() > 1 => q.pop_front().unwrap_or_else(|| default.clone()),
            Some(q) => q.front().cloned().unwrap_or_else(|| default.clone()),
            None => default.clone(),
        }
    }

    fn enter(&mut self) {
        self.live += 1;
        self.peak = self.peak.max(self.live);
    }

    fn leave(&mut self) {
        self.live = self.live.saturating_sub(1);
    }

    /// Marks `serial` as no longer live; returns false if it already was.
    fn retire(&mut self, serial: u64) -> bool {
        let was_live = self
            .sessions
            .get_mut(&serial)
            .map(|s| std::mem::replace(&mut s.live, false))
            .unwrap_or(false);
        if was_live {
            self.leave();
        }
        was_live
    }
}

/// Scripted in-memory [`SessionClient`].
#[derive(Clone)]
pub struct MemoryClient {
    default: Behavior,
    next_serial: Arc<AtomicU64>,
    state: Arc<Mutex<State>>,
}

impl Default for MemoryClient {
    fn default() -> Self {
        Self::new(Behavior::default())
    }
}

impl MemoryClient {
    /// Creates a platform where every task follows `default`.
    pub fn new(default: Behavior) -> Self {
        Self {
            default,
            next_serial: Arc::new(AtomicU64::new(1)),
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Scripts the creation attempts of one `(date, partition)`.
    ///
    /// Attempt `n` uses entry `n`; the last entry repeats.
    pub fn script(
        self,
        date: NaiveDate,
        partition: u32,
        behaviors: impl IntoIterator<Item = Behavior>,
    ) -> Self {
        let q: VecDeque<_> = behaviors.into_iter().collect();
        if !q.is_empty() {
            self.lock().scripts.insert((date, partition), q);
        }
        self
    }

    /// Makes every `delete` call fail.
    pub fn with_failing_deletes(self) -> Self {
        self.lock().failing_deletes = true;
        self
    }

    /// Creation attempts made for `(date, partition)`.
    pub fn attempts(&self, date: NaiveDate, partition: u32) -> u32 {
        self.lock()
            .attempts
            .get(&(date, partition))
            .copied()
            .unwrap_or(0)
    }

    /// Creation attempts across all tasks.
    pub fn total_attempts(&self) -> u32 {
        self.lock().attempts.values().sum()
    }

    /// Names of sessions created, in creation order.
    pub fn created(&self) -> Vec<String> {
        self.lock().created.clone()
    }

    /// Names of sessions deleted, in deletion order.
    pub fn deleted(&self) -> Vec<String> {
        self.lock().deleted.clone()
    }

    /// Highest number of sessions creating or live at the same time.
    pub fn peak_live(&self) -> usize {
        self.lock().peak
    }

    /// Sessions currently creating or live.
    pub fn live(&self) -> usize {
        self.lock().live
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Releases the live slot if `create` is dropped before it answers.
struct CreatingGuard {
    state: Arc<Mutex<State>>,
    armed: bool,
}

impl Drop for CreatingGuard {
    fn drop(&mut self) {
        if self.armed {
            self.state
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .leave();
        }
    }
}

#[async_trait]
impl SessionClient for MemoryClient {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create(&self, desc: &SessionDescriptor) -> Result<SessionHandle, SessionError> {
        let behavior = {
            let mut st = self.lock();
            *st.attempts.entry(key(&desc.task)).or_default() += 1;
            st.enter();
            st.next_behavior(&desc.task, &self.default)
        };
        let mut guard = CreatingGuard {
            state: Arc::clone(&self.state),
            armed: true,
        };

        if !behavior.create_delay.is_zero() {
            tokio::time::sleep(behavior.create_delay).await;
        }

        match behavior.create {
            CreateOutcome::Fail(reason) => Err(SessionError::Fail { reason }),
            CreateOutcome::Fatal(reason) => Err(SessionError::Fatal { reason }),
            CreateOutcome::Succeed => {
                guard.armed = false;
                let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
                let name: Arc<str> = desc.name.as_str().into();
                let mut st = self.lock();
                st.created.push(desc.name.clone());
                st.sessions.insert(
                    serial,
                    Session {
                        name: Arc::clone(&name),
                        timeline: behavior.timeline,
                        token: CancellationToken::new(),
                        live: true,
                    },
                );
                Ok(SessionHandle { serial, name })
            }
        }
    }

    async fn subscribe(
        &self,
        handle: &SessionHandle,
        sink: StatusSink,
    ) -> Result<(), SessionError> {
        let (timeline, token) = {
            let mut st = self.lock();
            let session = st
                .sessions
                .get_mut(&handle.serial)
                .ok_or_else(|| SessionError::fail(format!("unknown session {handle}")))?;
            (std::mem::take(&mut session.timeline), session.token.clone())
        };

        let state = Arc::clone(&self.state);
        let serial = sink.serial();
        tokio::spawn(async move {
            for (delay, status) in timeline {
                if sink.is_closed() {
                    return;
                }
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                let terminal = status.is_terminal();
                if terminal {
                    state
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .retire(serial);
                }
                if !sink.send(status).await || terminal {
                    return;
                }
            }
        });
        Ok(())
    }

    async fn delete(&self, handle: &SessionHandle) -> Result<(), SessionError> {
        let mut st = self.lock();
        if st.failing_deletes {
            return Err(SessionError::fail(format!("delete refused for {handle}")));
        }
        st.retire(handle.serial);
        let session = st
            .sessions
            .remove(&handle.serial)
            .ok_or_else(|| SessionError::fail(format!("unknown session {handle}")))?;
        session.token.cancel();
        st.deleted.push(session.name.to_string());
        Ok(())
    }
}
