//! # Remote session client.
//!
//! The orchestrator never talks to a platform directly; it goes through a
//! [`SessionClient`]:
//!
//! ```text
//! create(descriptor) ──► SessionHandle { serial, name }
//! subscribe(handle, sink) ──► client pushes SessionStatus into sink until terminal
//! delete(handle) ──► session removed (stopping it first if needed)
//! ```
//!
//! Status delivery is push based: a client forwards every status change for a
//! subscribed session into its [`StatusSink`], which feeds the orchestrator's
//! single inbound channel. Clients must stop pushing after a terminal status.
//!
//! Two backends ship with the crate:
//! - [`MemoryClient`]: scripted in-memory platform, used by tests and demos.
//! - [`ProcessClient`]: runs each session as a local child process.

mod memory;
mod process;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::Inbound;
use crate::error::SessionError;
use crate::tasks::SessionDescriptor;

pub use memory::{Behavior, CreateOutcome, MemoryClient};
pub use process::ProcessClient;

/// Platform-assigned identity of a created session.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    /// Serial number, unique per platform.
    pub serial: u64,
    /// Session name from the descriptor.
    pub name: Arc<str>,
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.serial)
    }
}

/// Lifecycle status reported by the platform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    /// Session accepted, worker not assigned yet.
    Initializing,
    /// Waiting for a worker to become available.
    AcquiringWorker,
    /// Worker script is executing.
    Running,
    /// Worker finished successfully.
    Completed,
    /// Session was stopped; treated as a successful finish.
    Stopped,
    /// Session failed; `details` carries the platform's exception text.
    Failed {
        /// Exception or exit details.
        details: String,
    },
}

impl SessionStatus {
    /// True for statuses after which no further updates arrive.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Stopped | SessionStatus::Failed { .. }
        )
    }

    /// Short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            SessionStatus::Initializing => "initializing",
            SessionStatus::AcquiringWorker => "acquiring_worker",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Stopped => "stopped",
            SessionStatus::Failed { .. } => "failed",
        }
    }
}

/// Status notification for one session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusUpdate {
    /// Session the status belongs to.
    pub serial: u64,
    /// New status.
    pub status: SessionStatus,
}

/// Where a client delivers status changes for one subscribed session.
#[derive(Clone, Debug)]
pub struct StatusSink {
    serial: u64,
    tx: mpsc::Sender<Inbound>,
}

impl StatusSink {
    pub(crate) fn new(serial: u64, tx: mpsc::Sender<Inbound>) -> Self {
        Self { serial, tx }
    }

    /// Serial of the session this sink is bound to.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Delivers `status`. Returns `false` once the orchestrator is gone.
    pub async fn send(&self, status: SessionStatus) -> bool {
        let update = StatusUpdate {
            serial: self.serial,
            status,
        };
        self.tx.send(Inbound::Status(update)).await.is_ok()
    }

    /// True once the orchestrator stopped listening.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Creates, observes and deletes remote sessions.
///
/// Implementations must be cheap to share (`Arc<dyn SessionClient>`); every
/// call may run concurrently with any other.
#[async_trait]
pub trait SessionClient: Send + Sync + 'static {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Creates a session. Retryable failures map to [`SessionError::Fail`],
    /// permanent ones to [`SessionError::Fatal`].
    async fn create(&self, desc: &SessionDescriptor) -> Result<SessionHandle, SessionError>;

    /// Starts pushing status changes of `handle` into `sink`.
    ///
    /// Returns once the subscription is registered, not when the session ends.
    async fn subscribe(&self, handle: &SessionHandle, sink: StatusSink)
    -> Result<(), SessionError>;

    /// Deletes the session, stopping it first if it is still running.
    async fn delete(&self, handle: &SessionHandle) -> Result<(), SessionError>;
}
