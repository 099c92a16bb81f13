//! # Unit of work: one `(date, partition)` pair.
//!
//! A [`Task`] is created once by the [`TaskGenerator`](crate::TaskGenerator) and
//! never mutated. It is small and `Copy`, so it doubles as the key under which the
//! orchestrator tracks sessions, retries and terminal buckets.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Execution mode a task is launched in.
///
/// Mirrors the mutually exclusive `replay` / `batch` blocks of the run config.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeTag {
    /// Time-simulated replay of historical data.
    Replay,
    /// One-shot batch run that terminates on completion.
    Batch,
}

impl ModeTag {
    /// Lowercase name, used as the session name prefix.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModeTag::Replay => "replay",
            ModeTag::Batch => "batch",
        }
    }
}

impl fmt::Display for ModeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable unit of work.
///
/// Ordering is `(date, partition)`, which is also generation order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Task {
    /// Date being processed.
    pub date: NaiveDate,
    /// Partition index in `[0, num_partitions)`.
    pub partition: u32,
    /// Mode the session runs in.
    pub mode: ModeTag,
}

impl Task {
    /// Creates a task.
    pub fn new(date: NaiveDate, partition: u32, mode: ModeTag) -> Self {
        Self {
            date,
            partition,
            mode,
        }
    }

    /// Date as `YYYYMMDD`, used inside session names.
    pub fn compact_date(&self) -> String {
        self.date.format("%Y%m%d").to_string()
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "date={} partition={}", self.date, self.partition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_rerun_identity() {
        let t = Task::new(
            NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
            7,
            ModeTag::Replay,
        );
        assert_eq!(t.to_string(), "date=2024-01-03 partition=7");
        assert_eq!(t.compact_date(), "20240103");
    }

    #[test]
    fn ordering_is_date_then_partition() {
        let d1 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let mut v = vec![
            Task::new(d2, 0, ModeTag::Batch),
            Task::new(d1, 1, ModeTag::Batch),
            Task::new(d1, 0, ModeTag::Batch),
        ];
        v.sort();
        assert_eq!(
            v.iter().map(|t| (t.date, t.partition)).collect::<Vec<_>>(),
            vec![(d1, 0), (d1, 1), (d2, 0)]
        );
    }

    #[test]
    fn mode_breaks_ties_last() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let replay = Task::new(d, 1, ModeTag::Replay);
        let batch = Task::new(d, 0, ModeTag::Batch);
        assert!(batch < replay);
        assert!(Task::new(d, 0, ModeTag::Replay) < batch);
    }
}
