//! # Event subscribers.
//!
//! This module provides the [`Subscribe`] trait, the [`SubscriberSet`] fan-out
//! and the built-in [`LogWriter`] for events broadcast through the
//! [`Bus`](crate::Bus).
//!
//! ## Architecture
//! ```text
//! Event flow:
//!   Orchestrator ── publish(Event) ──► Bus ──► subscriber listener
//!                                                   │
//!                                                   └──► SubscriberSet::emit(&Event)
//!                                                            │
//!                                                   ┌────────┼────────┐
//!                                                   ▼        ▼        ▼
//!                                               LogWriter  Custom    ...
//! ```

mod log;
mod set;
mod subscribe;

pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
