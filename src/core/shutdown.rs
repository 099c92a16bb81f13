//! # Shutdown coordination.
//!
//! ```text
//!            1st signal            2nd signal
//! Running ─────────────► Draining ─────────────► Terminated
//!    │                      ▲
//!    └── failure limit ─────┘
//! ```
//!
//! - **Draining**: no new task enters `Creating`; unstarted tasks are
//!   abandoned; active sessions run to a terminal state.
//! - **Terminated**: the loop exits at once; active sessions are abandoned and
//!   deleted best-effort within the grace period.
//!
//! Signals come from two places: the OS (see [`OsSignals`]) and any
//! [`ShutdownHandle`] clone, so tests and embedders can interrupt a run.
//!
//! ## OS signals
//! **Unix platforms:** `SIGINT` (Ctrl-C), `SIGTERM`, `SIGQUIT`.
//!
//! **Windows platforms:** `Ctrl-C` via [`tokio::signal::ctrl_c`].

use tokio::sync::mpsc;

/// Phase of the run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Admitting tasks.
    Running,
    /// Admission stopped; waiting for active sessions.
    Draining,
    /// Exiting without waiting.
    Terminated,
}

/// Tracks the shutdown phase and counts interruptions.
///
/// A drain started by the failure limit is not an interruption: the first
/// signal after it still only drains.
#[derive(Debug)]
pub(crate) struct ShutdownCoordinator {
    phase: ShutdownPhase,
    signals: u32,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            phase: ShutdownPhase::Running,
            signals: 0,
        }
    }

    pub fn phase(&self) -> ShutdownPhase {
        self.phase
    }

    pub fn interrupted(&self) -> bool {
        self.signals > 0
    }

    /// Records an interruption and returns the new phase.
    pub fn on_signal(&mut self) -> ShutdownPhase {
        self.signals += 1;
        self.phase = if self.signals >= 2 {
            ShutdownPhase::Terminated
        } else {
            ShutdownPhase::Draining
        };
        self.phase
    }

    /// Starts draining without an interruption. Returns `false` if the run was
    /// already past `Running`.
    pub fn drain(&mut self) -> bool {
        if self.phase == ShutdownPhase::Running {
            self.phase = ShutdownPhase::Draining;
            true
        } else {
            false
        }
    }
}

/// Interrupts a running [`Orchestrator`](crate::Orchestrator).
///
/// The first [`trigger`](ShutdownHandle::trigger) drains, the second
/// terminates, exactly like two Ctrl-C presses.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    tx: mpsc::Sender<()>,
}

impl ShutdownHandle {
    pub(crate) fn new(tx: mpsc::Sender<()>) -> Self {
        Self { tx }
    }

    /// Delivers one interruption. Returns `false` if the run is over.
    pub fn trigger(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }
}

/// OS termination signal listeners, registered once per run.
#[cfg(unix)]
pub(crate) struct OsSignals {
    sigint: tokio::signal::unix::Signal,
    sigterm: tokio::signal::unix::Signal,
    sigquit: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl OsSignals {
    /// Registers the listeners; fails if the runtime cannot install them.
    pub fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            sigint: signal(SignalKind::interrupt())?,
            sigterm: signal(SignalKind::terminate())?,
            sigquit: signal(SignalKind::quit())?,
        })
    }

    /// Completes on the next termination signal.
    pub async fn recv(&mut self) {
        tokio::select! {
            _ = self.sigint.recv()  => {},
            _ = self.sigterm.recv() => {},
            _ = self.sigquit.recv() => {},
        }
    }
}

/// OS termination signal listeners, registered once per run.
#[cfg(not(unix))]
pub(crate) struct OsSignals;

#[cfg(not(unix))]
impl OsSignals {
    /// Nothing to register ahead of time on this platform.
    pub fn install() -> std::io::Result<Self> {
        Ok(Self)
    }

    /// Completes on the next Ctrl-C.
    pub async fn recv(&mut self) {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Forwards OS signals into the shutdown channel until the run ends.
pub(crate) async fn forward_os_signals(mut signals: OsSignals, tx: mpsc::Sender<()>) {
    loop {
        tokio::select! {
            _ = tx.closed() => return,
            _ = signals.recv() => {
                if tx.send(()).await.is_err() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_signals_terminate() {
        let mut c = ShutdownCoordinator::new();
        assert_eq!(c.phase(), ShutdownPhase::Running);
        assert_eq!(c.on_signal(), ShutdownPhase::Draining);
        assert!(c.interrupted());
        assert_eq!(c.on_signal(), ShutdownPhase::Terminated);
    }

    #[test]
    fn failure_limit_drain_is_not_an_interrupt() {
        let mut c = ShutdownCoordinator::new();
        assert!(c.drain());
        assert!(!c.drain());
        assert!(!c.interrupted());
        assert_eq!(c.on_signal(), ShutdownPhase::Draining);
        assert_eq!(c.on_signal(), ShutdownPhase::Terminated);
    }

    #[tokio::test]
    async fn handle_stops_delivering_after_receiver_drops() {
        let (tx, rx) = mpsc::channel(4);
        let handle = ShutdownHandle::new(tx);
        assert!(handle.trigger());
        drop(rx);
        assert!(!handle.trigger());
    }
}
