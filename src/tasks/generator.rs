//! # Task generator: date range x partitions.
//!
//! [`TaskGenerator`] expands `{start, end, weekdays_only, num_partitions}` into the
//! ordered list of [`Task`]s, dates in the outer loop and partitions in the inner one.
//!
//! ## Rules
//! - Input is validated in [`TaskGenerator::new`], before anything is created.
//! - The sequence is finite and restartable: [`TaskGenerator::iter`] borrows `&self`.
//! - Weekday filtering may remove every date; that yields zero tasks, not an error.
//!
//! ## Example
//! ```rust
//! use chrono::NaiveDate;
//! use pqvisor::{ModeTag, TaskGenerator};
//!
//! let generator = TaskGenerator::new(
//!     NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
//!     NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
//!     true,
//!     2,
//!     ModeTag::Replay,
//! ).unwrap();
//!
//! // 2024-01-01..=03 are Mon..Wed, 04/05 are Thu/Fri.
//! assert_eq!(generator.len(), 10);
//! ```

use chrono::{Datelike, NaiveDate, Weekday};

use crate::error::TaskGenError;

use super::task::{ModeTag, Task};

/// Upper bound on `num_partitions`.
pub const MAX_PARTITIONS: u32 = 1000;

/// Validated generator input.
#[derive(Clone, Debug)]
pub struct TaskGenerator {
    start: NaiveDate,
    end: NaiveDate,
    weekdays_only: bool,
    num_partitions: u32,
    mode: ModeTag,
}

impl TaskGenerator {
    /// Validates the input and returns a generator.
    ///
    /// Fails if `start > end` or `num_partitions` is outside `[1, 1000]`.
    pub fn new(
        start: NaiveDate,
        end: NaiveDate,
        weekdays_only: bool,
        num_partitions: u32,
        mode: ModeTag,
    ) -> Result<Self, TaskGenError> {
        if start > end {
            return Err(TaskGenError::InvertedRange { start, end });
        }
        if num_partitions == 0 || num_partitions > MAX_PARTITIONS {
            return Err(TaskGenError::Partitions {
                got: num_partitions,
                max: MAX_PARTITIONS,
            });
        }
        Ok(Self {
            start,
            end,
            weekdays_only,
            num_partitions,
            mode,
        })
    }

    /// Qualifying dates in ascending order.
    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        let end = self.end;
        self.start
            .iter_days()
            .take_while(move |d| *d <= end)
            .filter(move |d| !self.weekdays_only || is_weekday(*d))
    }

    /// All tasks, dates outer, partitions inner.
    pub fn iter(&self) -> impl Iterator<Item = Task> + '_ {
        let parts = self.num_partitions;
        let mode = self.mode;
        self.dates()
            .flat_map(move |date| (0..parts).map(move |p| Task::new(date, p, mode)))
    }

    /// Collects [`TaskGenerator::iter`].
    pub fn generate(&self) -> Vec<Task> {
        self.iter().collect()
    }

    /// Number of tasks the generator yields.
    pub fn len(&self) -> usize {
        self.dates().count() * self.num_partitions as usize
    }

    /// True if weekday filtering left no dates.
    pub fn is_empty(&self) -> bool {
        self.dates().next().is_none()
    }

    /// Partition count.
    pub fn num_partitions(&self) -> u32 {
        self.num_partitions
    }
}

fn is_weekday(d: NaiveDate) -> bool {
    !matches!(d.weekday(), Weekday::Sat | Weekday::Sun)
}
