//! # Exponential backoff between creation attempts.
//!
//! [`BackoffPolicy`] turns a task and its retry index into a wait before the
//! next `create` call for that task:
//!
//! ```text
//! base(n)        = min(first * factor^n, max)
//! delay(task, n) = jitter.spread(task, n, base(n))
//! ```
//!
//! The base is derived from `n` alone, so a jittered delay never shrinks the
//! next one.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use chrono::NaiveDate;
//! use pqvisor::{BackoffPolicy, JitterPolicy, ModeTag, Task};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_secs(1),
//!     max: Duration::from_secs(60),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! let task = Task::new(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(), 0, ModeTag::Replay);
//! assert_eq!(backoff.delay(&task, 0), Duration::from_secs(1));
//! assert_eq!(backoff.delay(&task, 3), Duration::from_secs(8));
//! assert_eq!(backoff.base(10), Duration::from_secs(60));
//! ```

use std::time::Duration;

use crate::policies::jitter::{Bounds, JitterPolicy};
use crate::tasks::Task;

/// Delay schedule for creation retries.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry (`retry_delay_seconds`).
    pub first: Duration,
    /// Cap (`retry_max_delay_seconds`).
    pub max: Duration,
    /// Growth per retry; `2.0` doubles.
    pub factor: f64,
    /// Randomization applied to the capped base.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// `1s` doubling up to `60s`, no jitter.
    fn default() -> Self {
        Self {
            first: Duration::from_secs(1),
            max: Duration::from_secs(60),
            factor: 2.0,
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// Unjittered delay before retry number `retry` (0-indexed).
    ///
    /// Non-finite or negative intermediate values clamp to [`BackoffPolicy::max`].
    pub fn base(&self, retry: u32) -> Duration {
        let max_secs = self.max.as_secs_f64();
        let exp = retry.min(i32::MAX as u32) as i32;
        let raw = self.first.as_secs_f64() * self.factor.powi(exp);

        if !raw.is_finite() || raw < 0.0 || raw > max_secs {
            self.max
        } else {
            Duration::from_secs_f64(raw)
        }
    }

    /// Delay before retry number `retry` of `task`, jitter included.
    pub fn delay(&self, task: &Task, retry: u32) -> Duration {
        let bounds = Bounds {
            first: self.first,
            max: self.max,
        };
        self.jitter.spread(task, retry, self.base(retry), bounds)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::tasks::ModeTag;

    fn task(partition: u32) -> Task {
        Task::new(
            NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            partition,
            ModeTag::Batch,
        )
    }

    fn doubling(jitter: JitterPolicy) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_secs(1),
            max: Duration::from_secs(60),
            factor: 2.0,
            jitter,
        }
    }

    #[test]
    fn default_matches_documented_schedule() {
        let p = BackoffPolicy::default();
        assert_eq!(p, doubling(JitterPolicy::None));
    }

    #[test]
    fn doubles_until_cap() {
        let p = doubling(JitterPolicy::None);
        let got: Vec<u64> = (0..8).map(|n| p.delay(&task(0), n).as_secs()).collect();
        assert_eq!(got, vec![1, 2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn first_above_cap_is_capped() {
        let p = BackoffPolicy {
            first: Duration::from_secs(90),
            ..doubling(JitterPolicy::None)
        };
        assert_eq!(p.base(0), Duration::from_secs(60));
    }

    #[test]
    fn overflow_clamps_to_cap() {
        let p = doubling(JitterPolicy::None);
        assert_eq!(p.base(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn full_jitter_stays_under_base() {
        let p = doubling(JitterPolicy::Full);
        for n in 0..10 {
            for part in 0..8 {
                assert!(p.delay(&task(part), n) <= p.base(n), "retry {n}");
            }
        }
    }

    #[test]
    fn equal_jitter_keeps_half() {
        let p = doubling(JitterPolicy::Equal);
        for n in 0..10 {
            let base = p.base(n);
            let d = p.delay(&task(n), n);
            assert!(d >= base / 2 && d <= base, "retry {n}: {d:?}");
        }
    }

    #[test]
    fn decorrelated_jitter_respects_floor_and_cap() {
        let p = doubling(JitterPolicy::Decorrelated);
        for part in 0..100 {
            let d = p.delay(&task(part), 6);
            assert!(d >= Duration::from_secs(1));
            assert!(d <= Duration::from_secs(60));
        }
    }
}
