//! Runtime core: the control loop and its parts.
//!
//! The public API from this module is [`Orchestrator`] plus the pieces tests
//! and embedders may want on their own ([`OrchestratorConfig`], [`RunState`],
//! [`classify`], [`StallDetector`], [`ShutdownHandle`]).
//!
//! Internal modules:
//! - [`orchestrator`]: the single-owner control loop;
//! - [`admission`]: pending queue, active set, retry parking;
//! - [`runner`]: one creation attempt with timeout/cancellation and events;
//! - [`monitor`]: status classification and stall detection;
//! - [`shutdown`]: drain/terminate phases and OS signal forwarding;
//! - [`state`]: run counters and per-session records;
//! - [`inbound`]: messages from off-loop work into the loop.

mod admission;
mod config;
mod inbound;
mod monitor;
mod orchestrator;
mod runner;
mod shutdown;
mod state;

pub use config::OrchestratorConfig;
pub use monitor::{Classification, RESOURCE_UNAVAILABLE_MARKERS, StallDetector, classify};
pub use orchestrator::Orchestrator;
pub use shutdown::{ShutdownHandle, ShutdownPhase};
pub use state::RunState;

pub(crate) use inbound::Inbound;
