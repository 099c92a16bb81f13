//! # Final report and exit code.
//!
//! [`RunReport`] is what [`Orchestrator::run`](crate::Orchestrator::run) returns:
//! the terminal buckets, the failed tasks (with date and partition, enough to
//! rerun them) and a few run-level flags. [`ExitCode`] is a pure function of
//! the counters:
//!
//! | failed creation | failed execution | abandoned | exit |
//! |-----------------|------------------|-----------|------|
//! | 0               | 0                | 0         | 0    |
//! | > 0             | 0                | any       | 1    |
//! | 0               | 0                | > 0       | 1    |
//! | 0               | > 0              | any       | 2    |
//! | > 0             | > 0              | any       | 3    |
//!
//! Tasks abandoned only because the run drained (never started, or cut off by
//! a forced termination) do not turn an execution-failure run into code 3.
//!
//! Code 4 is reserved for runs that never produced a report (invalid config,
//! runtime error).

use std::fmt;

use crate::core::RunState;
use crate::tasks::Task;

/// Process exit code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExitCode {
    /// Every task completed.
    Success = 0,
    /// Creation gave up on some tasks (or tasks were abandoned), none failed
    /// while executing.
    CreationFailures = 1,
    /// Some sessions failed while executing, no creation gave up.
    ExecutionFailures = 2,
    /// Both of the above.
    BothFailures = 3,
    /// The run aborted before producing a report.
    Error = 4,
}

impl ExitCode {
    /// Maps terminal counters to an exit code.
    ///
    /// # Example
    /// ```
    /// use pqvisor::ExitCode;
    ///
    /// assert_eq!(ExitCode::from_counts(0, 0, 0), ExitCode::Success);
    /// assert_eq!(ExitCode::from_counts(0, 2, 4), ExitCode::ExecutionFailures);
    /// assert_eq!(ExitCode::from_counts(2, 1, 2), ExitCode::BothFailures);
    /// ```
    pub fn from_counts(failed_creation: usize, failed_execution: usize, abandoned: usize) -> Self {
        match (failed_creation > 0, failed_execution > 0) {
            (true, true) => ExitCode::BothFailures,
            (false, true) => ExitCode::ExecutionFailures,
            (true, false) => ExitCode::CreationFailures,
            (false, false) if abandoned > 0 => ExitCode::CreationFailures,
            (false, false) => ExitCode::Success,
        }
    }

    /// Numeric value.
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code.code())
    }
}

/// Why a task ended up outside the `completed` bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The session ran and failed.
    Execution,
    /// Creation kept failing until retries ran out.
    RetriesExhausted,
    /// Creation failed with a non-retryable error.
    Fatal,
    /// Never started because the run was draining.
    NotStarted,
    /// Still creating or running when the run was force-terminated.
    ForcedTermination,
}

impl FailureKind {
    /// Short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            FailureKind::Execution => "execution_failed",
            FailureKind::RetriesExhausted => "retries_exhausted",
            FailureKind::Fatal => "creation_fatal",
            FailureKind::NotStarted => "not_started",
            FailureKind::ForcedTermination => "forced_termination",
        }
    }

    /// True if the task sits in the `abandoned` bucket.
    pub fn is_abandoned(&self) -> bool {
        !matches!(self, FailureKind::Execution)
    }
}

/// One task that did not complete.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailedTask {
    /// The task.
    pub task: Task,
    /// Bucket and cause.
    pub kind: FailureKind,
    /// Last error or failure details.
    pub reason: String,
}

/// Outcome of a run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Final counters.
    pub state: RunState,
    /// A shutdown signal was received.
    pub interrupted: bool,
    /// A second signal force-terminated the run.
    pub forced: bool,
    /// `max_failures` was reached.
    pub failure_limit_reached: bool,
    /// Sessions deleted by cleanup.
    pub deleted: usize,
    /// Deletions that failed.
    pub delete_failures: usize,
    /// Every task outside `completed`, in the order it got there.
    pub failures: Vec<FailedTask>,
}

impl RunReport {
    /// Exit code for this report.
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from_counts(
            self.state.failed_creation,
            self.state.failed_execution,
            self.state.abandoned,
        )
    }

    /// Tasks that did not complete.
    pub fn failed(&self) -> usize {
        self.state.failed_execution + self.state.abandoned
    }

    /// One-line summary, e.g. `6/6 completed, 0 failed.`
    pub fn headline(&self) -> String {
        format!(
            "{}/{} completed, {} failed.",
            self.state.completed,
            self.state.total,
            self.failed()
        )
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.state;
        writeln!(f, "{}", self.headline())?;
        writeln!(f, "  sessions created:    {}", s.created)?;
        writeln!(f, "  completed:           {}", s.completed)?;
        writeln!(f, "  failed (execution):  {}", s.failed_execution)?;
        writeln!(f, "  failed (creation):   {}", s.failed_creation)?;
        writeln!(f, "  abandoned:           {}", s.abandoned)?;
        if self.interrupted {
            let how = if self.forced { "forced" } else { "graceful" };
            writeln!(f, "  interrupted:         {how}")?;
        }
        if self.failure_limit_reached {
            writeln!(f, "  failure limit reached")?;
        }
        if self.deleted > 0 || self.delete_failures > 0 {
            writeln!(
                f,
                "  cleanup:             {} deleted, {} failed",
                self.deleted, self.delete_failures
            )?;
        }
        if !self.failures.is_empty() {
            writeln!(f, "Failed tasks:")?;
            for ft in &self.failures {
                writeln!(
                    f,
                    "  - date={} partition={} [{}] {}",
                    ft.task.date,
                    ft.task.partition,
                    ft.kind.as_label(),
                    ft.reason
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::tasks::ModeTag;

    fn state(total: usize, completed: usize, failed_execution: usize, abandoned: usize) -> RunState {
        RunState {
            total,
            created: completed + failed_execution,
            completed,
            failed_execution,
            abandoned,
            ..RunState::default()
        }
    }

    #[test]
    fn exit_code_table() {
        assert_eq!(ExitCode::from_counts(0, 0, 0).code(), 0);
        assert_eq!(ExitCode::from_counts(1, 0, 1).code(), 1);
        assert_eq!(ExitCode::from_counts(0, 0, 3).code(), 1);
        assert_eq!(ExitCode::from_counts(0, 1, 0).code(), 2);
        assert_eq!(ExitCode::from_counts(1, 1, 1).code(), 3);
        assert_eq!(ExitCode::Error.code(), 4);
    }

    #[test]
    fn drained_tasks_do_not_count_as_creation_failures() {
        let report = RunReport {
            state: state(6, 0, 2, 4),
            failure_limit_reached: true,
            ..RunReport::default()
        };
        assert_eq!(report.state.failed_creation, 0);
        assert_eq!(report.exit_code(), ExitCode::ExecutionFailures);

        let both = RunReport {
            state: RunState {
                failed_creation: 1,
                ..state(6, 0, 2, 4)
            },
            ..RunReport::default()
        };
        assert_eq!(both.exit_code(), ExitCode::BothFailures);
    }

    #[test]
    fn exit_code_depends_only_on_counters() {
        let a = RunReport {
            state: state(10, 8, 2, 0),
            ..RunReport::default()
        };
        let b = RunReport {
            state: state(10, 8, 2, 0),
            interrupted: true,
            deleted: 8,
            ..RunReport::default()
        };
        assert_eq!(a.exit_code(), b.exit_code());
        assert_eq!(a.exit_code(), ExitCode::ExecutionFailures);
    }

    #[test]
    fn headline_and_failed_list() {
        let task = Task::new(
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            1,
            ModeTag::Replay,
        );
        let report = RunReport {
            state: RunState {
                failed_creation: 1,
                ..state(6, 5, 0, 1)
            },
            failures: vec![FailedTask {
                task,
                kind: FailureKind::RetriesExhausted,
                reason: "creation failed: no capacity".into(),
            }],
            ..RunReport::default()
        };
        assert_eq!(report.headline(), "5/6 completed, 1 failed.");
        let text = report.to_string();
        assert!(text.contains("date=2024-01-02 partition=1 [retries_exhausted]"));
        assert_eq!(report.exit_code(), ExitCode::CreationFailures);
    }

    #[test]
    fn all_complete_headline() {
        let report = RunReport {
            state: state(6, 6, 0, 0),
            ..RunReport::default()
        };
        assert_eq!(report.headline(), "6/6 completed, 0 failed.");
        assert_eq!(report.exit_code(), ExitCode::Success);
    }
}
