//! # Admission controller.
//!
//! Holds every task that is not yet in a terminal bucket and decides which one
//! may start next:
//!
//! ```text
//!            admit()                      take()
//! pending ───────────► active ──────────────────────► (terminal or waiting)
//!    ▲                  (≤ max)                               │
//!    └──────────── requeue_front() ◄──── defer() ◄────────────┘
//! ```
//!
//! ## Rules
//! - `active` (creating + running) never exceeds `max_concurrent`.
//! - Nothing is admitted once [`Admission::close`] was called.
//! - A task waiting for its retry delay holds no slot; when the delay is up it
//!   goes to the **front** of `pending`.
//! - Pending order is the generator order, apart from retries.

use std::collections::{HashMap, VecDeque};

use crate::client::SessionHandle;
use crate::tasks::Task;

use super::state::{Session, SessionState};

pub(crate) struct Admission {
    max_concurrent: usize,
    pending: VecDeque<Task>,
    active: HashMap<Task, Session>,
    by_serial: HashMap<u64, Task>,
    /// Tasks sleeping before a retry, with the retry count they will carry.
    waiting: HashMap<Task, u32>,
    /// Retry counts of tasks back in `pending` after a failed attempt.
    retries: HashMap<Task, u32>,
    closed: bool,
}

impl Admission {
    pub fn new(tasks: impl IntoIterator<Item = Task>, max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            pending: tasks.into_iter().collect(),
            active: HashMap::new(),
            by_serial: HashMap::new(),
            waiting: HashMap::new(),
            retries: HashMap::new(),
            closed: false,
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    /// True when no task is pending, active or waiting.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.active.is_empty() && self.waiting.is_empty()
    }

    /// Moves the next pending task to `Creating` if a slot is free.
    pub fn admit(&mut self) -> Option<&Session> {
        if self.closed || self.active.len() >= self.max_concurrent {
            return None;
        }
        let task = self.pending.pop_front()?;
        let retry_count = self.retries.remove(&task).unwrap_or(0);
        let session = self
            .active
            .entry(task)
            .or_insert_with(|| Session::creating(task, retry_count));
        Some(&*session)
    }

    /// Marks a creating session as created. Returns `false` if the task is no
    /// longer tracked (e.g. it was force-terminated meanwhile).
    pub fn activate(&mut self, task: &Task, handle: SessionHandle) -> bool {
        match self.active.get_mut(task) {
            Some(s) if s.state == SessionState::Creating => {
                self.by_serial.insert(handle.serial, *task);
                s.handle = Some(handle);
                s.state = SessionState::Active;
                true
            }
            _ => false,
        }
    }

    pub fn get_mut(&mut self, task: &Task) -> Option<&mut Session> {
        self.active.get_mut(task)
    }

    pub fn task_for_serial(&self, serial: u64) -> Option<Task> {
        self.by_serial.get(&serial).copied()
    }

    /// Removes a session from `active`, freeing its slot.
    pub fn take(&mut self, task: &Task) -> Option<Session> {
        let session = self.active.remove(task)?;
        if let Some(h) = &session.handle {
            self.by_serial.remove(&h.serial);
        }
        Some(session)
    }

    /// Parks a task until its retry delay is over.
    pub fn defer(&mut self, task: Task, retry_count: u32) {
        self.waiting.insert(task, retry_count);
    }

    /// Puts a waiting task at the front of `pending`. Returns `false` if the
    /// task was not waiting (e.g. drained meanwhile).
    pub fn requeue_front(&mut self, task: &Task) -> bool {
        let Some(retry_count) = self.waiting.remove(task) else {
            return false;
        };
        self.retries.insert(*task, retry_count);
        self.pending.push_front(*task);
        true
    }

    /// Stops admission and returns every task that has not started: pending
    /// ones in queue order, then those waiting for a retry.
    pub fn close(&mut self) -> Vec<Task> {
        self.closed = true;
        let mut unstarted: Vec<Task> = self.pending.drain(..).collect();
        let mut waiting: Vec<Task> = self.waiting.drain().map(|(t, _)| t).collect();
        waiting.sort();
        unstarted.extend(waiting);
        self.retries.clear();
        unstarted
    }

    /// Removes every active session.
    pub fn take_all_active(&mut self) -> Vec<Session> {
        self.by_serial.clear();
        let mut all: Vec<Session> = self.active.drain().map(|(_, s)| s).collect();
        all.sort_by_key(|s| s.task);
        all
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveDate;

    use super::*;
    use crate::tasks::ModeTag;

    fn task(day: u32, partition: u32) -> Task {
        Task::new(
            NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            partition,
            ModeTag::Replay,
        )
    }

    fn handle(serial: u64) -> SessionHandle {
        SessionHandle {
            serial,
            name: Arc::from(format!("s{serial}")),
        }
    }

    #[test]
    fn admits_up_to_bound_in_order() {
        let mut a = Admission::new([task(1, 0), task(1, 1), task(2, 0)], 2);
        assert_eq!(a.admit().map(|s| s.task), Some(task(1, 0)));
        assert_eq!(a.admit().map(|s| s.task), Some(task(1, 1)));
        assert!(a.admit().is_none());
        assert_eq!(a.active_len(), 2);

        a.take(&task(1, 0));
        assert_eq!(a.admit().map(|s| s.task), Some(task(2, 0)));
        assert_eq!(a.pending_len(), 0);
    }

    #[test]
    fn retry_goes_to_front_with_its_count() {
        let mut a = Admission::new([task(1, 0), task(1, 1)], 1);
        let first = a.admit().map(|s| s.task).unwrap();
        a.take(&first);
        a.defer(first, 1);
        assert_eq!(a.waiting_len(), 1);

        // Slot is free while waiting.
        assert_eq!(a.admit().map(|s| s.task), Some(task(1, 1)));
        a.take(&task(1, 1));

        assert!(a.requeue_front(&first));
        let s = a.admit().unwrap();
        assert_eq!(s.task, first);
        assert_eq!(s.retry_count, 1);
        assert_eq!(s.attempt(), 2);
    }

    #[test]
    fn close_returns_unstarted_and_blocks_admission() {
        let mut a = Admission::new([task(1, 0), task(1, 1), task(2, 0)], 1);
        let first = a.admit().map(|s| s.task).unwrap();
        a.defer(task(9, 0), 2);

        let unstarted = a.close();
        assert_eq!(unstarted, vec![task(1, 1), task(2, 0), task(9, 0)]);
        assert!(a.admit().is_none());
        assert!(!a.requeue_front(&task(9, 0)));
        assert_eq!(a.active_len(), 1);
        assert!(a.take(&first).is_some());
        assert!(a.is_idle());
    }

    #[test]
    fn serial_lookup_follows_activation() {
        let mut a = Admission::new([task(1, 0)], 1);
        a.admit();
        assert!(a.activate(&task(1, 0), handle(7)));
        assert_eq!(a.task_for_serial(7), Some(task(1, 0)));
        assert!(!a.activate(&task(1, 0), handle(8)));

        a.take(&task(1, 0));
        assert_eq!(a.task_for_serial(7), None);
        assert!(!a.activate(&task(1, 0), handle(9)));
    }
}
