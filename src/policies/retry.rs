//! # Retry policy for failed session creation.
//!
//! [`RetryPolicy::should_retry`] decides what happens to a task after a
//! creation attempt failed (or the platform reported it had no resources):
//!
//! ```text
//! error not retryable            -> Abandon
//! retry_count >= max_retries     -> Abandon
//! otherwise                      -> RetryAfter(backoff.delay(task, retry_count))
//! ```
//!
//! `retry_count` is the number of retries already scheduled, so
//! `max_retries = N` allows `N + 1` creation attempts in total.

use std::time::Duration;

use crate::error::SessionError;
use crate::policies::backoff::BackoffPolicy;
use crate::tasks::Task;

/// Outcome of [`RetryPolicy::should_retry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-queue the task once the delay has elapsed.
    RetryAfter(Duration),
    /// Give up on the task.
    Abandon,
}

/// Retry budget plus the delay schedule.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Delay between attempts.
    pub backoff: BackoffPolicy,
}

impl Default for RetryPolicy {
    /// Three retries on the default backoff.
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl RetryPolicy {
    /// Decides whether another creation attempt is made.
    ///
    /// # Example
    /// ```
    /// use chrono::NaiveDate;
    /// use pqvisor::{ModeTag, RetryDecision, RetryPolicy, SessionError, Task};
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::default();
    /// let task = Task::new(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(), 0, ModeTag::Replay);
    /// let err = SessionError::fail("connection reset");
    ///
    /// assert_eq!(policy.should_retry(&task, 0, &err), RetryDecision::RetryAfter(Duration::from_secs(1)));
    /// assert_eq!(policy.should_retry(&task, 3, &err), RetryDecision::Abandon);
    /// ```
    pub fn should_retry(&self, task: &Task, retry_count: u32, err: &SessionError) -> RetryDecision {
        if !err.is_retryable() || retry_count >= self.max_retries {
            return RetryDecision::Abandon;
        }
        RetryDecision::RetryAfter(self.backoff.delay(task, retry_count))
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::policies::JitterPolicy;
    use crate::tasks::ModeTag;

    fn task(partition: u32) -> Task {
        Task::new(
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            partition,
            ModeTag::Replay,
        )
    }

    #[test]
    fn zero_retries_abandons_on_first_failure() {
        let p = RetryPolicy {
            max_retries: 0,
            ..RetryPolicy::default()
        };
        assert_eq!(
            p.should_retry(&task(0), 0, &SessionError::fail("x")),
            RetryDecision::Abandon
        );
    }

    #[test]
    fn delays_double_per_retry() {
        let p = RetryPolicy {
            max_retries: 5,
            ..RetryPolicy::default()
        };
        let err = SessionError::Timeout {
            timeout: Duration::from_secs(60),
        };
        let delays: Vec<_> = (0..5)
            .map(|n| match p.should_retry(&task(0), n, &err) {
                RetryDecision::RetryAfter(d) => d.as_secs(),
                RetryDecision::Abandon => panic!("abandoned at {n}"),
            })
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16]);
        assert_eq!(p.should_retry(&task(0), 5, &err), RetryDecision::Abandon);
    }

    #[test]
    fn fatal_errors_are_never_retried() {
        let p = RetryPolicy::default();
        assert_eq!(
            p.should_retry(&task(0), 0, &SessionError::fatal("script rejected")),
            RetryDecision::Abandon
        );
        assert_eq!(
            p.should_retry(&task(0), 0, &SessionError::Canceled),
            RetryDecision::Abandon
        );
    }

    #[test]
    fn jittered_retries_are_reproducible_per_task() {
        let p = RetryPolicy {
            max_retries: 5,
            backoff: BackoffPolicy {
                jitter: JitterPolicy::Full,
                ..BackoffPolicy::default()
            },
        };
        let err = SessionError::fail("no workers");
        for n in 0..5 {
            assert_eq!(
                p.should_retry(&task(2), n, &err),
                p.should_retry(&task(2), n, &err)
            );
        }
    }
}
