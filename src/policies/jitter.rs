//! # Per-task jitter for retry delays.
//!
//! When the platform runs out of workers, every partition of a date fails at
//! once and would retry at once. [`JitterPolicy::spread`] moves each task's
//! delay inside a window around the backoff delay:
//!
//! ```text
//! None          base
//! Full          [0, base]
//! Equal         [base/2, base]
//! Decorrelated  [first, min(3 * base, max)]
//! ```
//!
//! The point inside the window is drawn from a generator seeded with
//! `(date, partition, mode, retry)`. Partitions of one date land on different
//! delays, and the same task on the same retry always waits the same time,
//! so a rerun of a config reproduces its retry schedule.
//!
//! Configured through `execution.retry_jitter` as a lowercase string.

use std::time::Duration;

use chrono::Datelike;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

use crate::tasks::{ModeTag, Task};

/// How retry delays of one task are spread out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JitterPolicy {
    /// Every task waits exactly the backoff delay.
    #[default]
    None,
    /// Anywhere up to the backoff delay.
    Full,
    /// At least half the backoff delay.
    Equal,
    /// Between the first delay and three times the backoff delay, capped.
    Decorrelated,
}

/// Backoff bounds the spread is clamped to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Bounds {
    /// Delay before the first retry.
    pub first: Duration,
    /// Largest delay ever returned.
    pub max: Duration,
}

impl JitterPolicy {
    /// Delay before retry `retry` of `task`, given its unjittered `base`.
    pub(crate) fn spread(&self, task: &Task, retry: u32, base: Duration, bounds: Bounds) -> Duration {
        let base_ms = millis(base);
        let (lo, hi) = match self {
            JitterPolicy::None => return base,
            JitterPolicy::Full => (0, base_ms),
            JitterPolicy::Equal => (base_ms / 2, base_ms),
            JitterPolicy::Decorrelated => {
                let lo = millis(bounds.first.min(bounds.max));
                (lo, base_ms.saturating_mul(3).min(millis(bounds.max)).max(lo))
            }
        };
        if lo >= hi {
            return Duration::from_millis(lo);
        }
        Duration::from_millis(rng_for(task, retry).random_range(lo..=hi))
    }
}

fn millis(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}

/// Generator owned by one retry of one task.
fn rng_for(task: &Task, retry: u32) -> StdRng {
    let day = u64::from(task.date.num_days_from_ce() as u32);
    let mode = match task.mode {
        ModeTag::Replay => 0,
        ModeTag::Batch => 1,
    };
    let seed = day << 32
        | u64::from(task.partition & 0xf_ffff) << 12
        | u64::from(retry.min(0x7ff)) << 1
        | mode;
    StdRng::seed_from_u64(seed)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    const BOUNDS: Bounds = Bounds {
        first: Duration::from_secs(1),
        max: Duration::from_secs(60),
    };

    fn task(partition: u32) -> Task {
        Task::new(
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            partition,
            ModeTag::Replay,
        )
    }

    #[test]
    fn parses_lowercase_names() {
        let j: JitterPolicy = serde_yaml::from_str("equal").unwrap();
        assert_eq!(j, JitterPolicy::Equal);
        let j: JitterPolicy = serde_yaml::from_str("decorrelated").unwrap();
        assert_eq!(j, JitterPolicy::Decorrelated);
        assert!(serde_yaml::from_str::<JitterPolicy>("Random").is_err());
    }

    #[test]
    fn none_keeps_the_backoff_delay() {
        let base = Duration::from_millis(2500);
        assert_eq!(JitterPolicy::None.spread(&task(0), 1, base, BOUNDS), base);
    }

    #[test]
    fn zero_delay_stays_zero() {
        for j in [JitterPolicy::Full, JitterPolicy::Equal] {
            assert_eq!(j.spread(&task(0), 0, Duration::ZERO, BOUNDS), Duration::ZERO);
        }
    }

    #[test]
    fn same_task_and_retry_wait_the_same() {
        let base = Duration::from_secs(8);
        for j in [JitterPolicy::Full, JitterPolicy::Equal, JitterPolicy::Decorrelated] {
            assert_eq!(
                j.spread(&task(3), 3, base, BOUNDS),
                j.spread(&task(3), 3, base, BOUNDS),
            );
        }
    }

    #[test]
    fn partitions_of_one_date_spread_out() {
        let base = Duration::from_secs(30);
        let mut delays: Vec<Duration> = (0..16)
            .map(|p| JitterPolicy::Full.spread(&task(p), 0, base, BOUNDS))
            .collect();
        delays.sort();
        delays.dedup();
        assert!(delays.len() > 1, "all partitions retry together");
        assert!(delays.iter().all(|d| *d <= base));
    }

    #[test]
    fn windows_hold_for_every_partition() {
        let base = Duration::from_secs(16);
        for p in 0..50 {
            let t = task(p);
            let equal = JitterPolicy::Equal.spread(&t, 4, base, BOUNDS);
            assert!(equal >= base / 2 && equal <= base, "equal {p}: {equal:?}");

            let dec = JitterPolicy::Decorrelated.spread(&t, 4, base, BOUNDS);
            assert!(dec >= BOUNDS.first && dec <= Duration::from_secs(48), "decorrelated {p}: {dec:?}");
        }
    }

    #[test]
    fn decorrelated_respects_the_cap() {
        let base = Duration::from_secs(60);
        for p in 0..50 {
            let d = JitterPolicy::Decorrelated.spread(&task(p), 9, base, BOUNDS);
            assert!(d >= BOUNDS.first && d <= BOUNDS.max);
        }
    }
}
