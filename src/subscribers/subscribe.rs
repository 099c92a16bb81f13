//! # Subscribe: hook into run lifecycle events.
//!
//! Anything that wants to watch a run (logs, metrics, a progress bar, an
//! alerting hook) implements [`Subscribe`] and is handed to
//! [`Orchestrator::new`](crate::Orchestrator::new). Each subscriber gets its own
//! bounded queue and worker inside the [`SubscriberSet`](crate::SubscriberSet),
//! so a slow `on_event` only delays itself.
//!
//! When the queue is full the subscriber misses events and a
//! [`SubscriberOverflow`](crate::EventKind::SubscriberOverflow) event is
//! published; size [`Subscribe::queue_capacity`] for the expected burst (one
//! event per status change of every active session).
//!
//! ## Example
//! ```rust
//! use pqvisor::{Event, EventKind, Subscribe};
//!
//! struct FailureCounter(std::sync::atomic::AtomicUsize);
//!
//! #[async_trait::async_trait]
//! impl Subscribe for FailureCounter {
//!     async fn on_event(&self, ev: &Event) {
//!         if ev.kind == EventKind::SessionFailed {
//!             self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
//!         }
//!     }
//!     fn name(&self) -> &'static str { "failure-counter" }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Receives every lifecycle event of a run, in publication order.
///
/// Runs on the subscriber's own worker task; blocking calls belong in
/// `spawn_blocking`.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    async fn on_event(&self, event: &Event);

    /// Name used in logs and subscriber trouble events.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Events buffered before this subscriber starts missing them.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
