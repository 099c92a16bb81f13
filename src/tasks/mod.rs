//! # Units of work.
//!
//! This module provides the task-related types:
//! - [`Task`] - immutable `(date, partition, mode)` triple
//! - [`TaskGenerator`] - expands a date range and partition count into tasks
//! - [`SessionDescriptor`] - the create request for one task
//! - [`Blueprint`] - run-wide template that builds descriptors

mod descriptor;
mod generator;
mod task;

pub use descriptor::{Blueprint, FieldValue, SessionDescriptor};
pub use generator::{MAX_PARTITIONS, TaskGenerator};
pub use task::{ModeTag, Task};
