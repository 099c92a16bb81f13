//! Retry policies.
//!
//! This module groups the knobs that control **whether** a failed creation is
//! attempted again and **how long** to wait before doing so.
//!
//! ## Contents
//! - [`RetryPolicy`]   retry budget and the retry/abandon decision
//! - [`BackoffPolicy`] how delays evolve (first / factor / max + jitter)
//! - [`JitterPolicy`]  per-task spread so partitions do not retry in lockstep
//!
//! ## Quick wiring
//! ```text
//! CreationFailed { task, error }
//!      └─► RetryPolicy::should_retry(&task, retry_count, &error)
//!           - RetryAfter(d) -> task re-queued at the front after d
//!           - Abandon       -> task moved to `abandoned`
//! ```
//!
//! ## Defaults
//! - `max_retries = 3`.
//! - `BackoffPolicy::default()` -> first=1s, factor=2.0, max=60s, jitter=None.

mod backoff;
mod jitter;
mod retry;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
pub use retry::{RetryDecision, RetryPolicy};
