//! # One session creation attempt.
//!
//! Runs `client.create(descriptor)` off-loop with an optional timeout and a
//! child cancellation token, publishes the lifecycle events and reports the
//! outcome to the control loop.
//!
//! ## Event flow
//!
//! ```text
//! Success:
//!   publish SessionCreating → create() → Ok(handle) → publish SessionCreated
//!
//! Failure:
//!   publish SessionCreating → create() → Err(Fail/Fatal) → publish CreationFailed
//!
//! Timeout:
//!   publish SessionCreating → timeout exceeded → drop create() → publish CreationFailed
//!
//! Cancellation (forced termination):
//!   publish SessionCreating → parent cancelled → drop create() → Err(Canceled), no event
//! ```
//!
//! ## Rules
//! - Publishes **at most one** terminal event: `SessionCreated` or `CreationFailed`.
//! - Always sends exactly one [`Inbound::Created`] (ignored if the loop is gone).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::{
    client::{SessionClient, SessionHandle},
    error::SessionError,
    events::{Bus, Event, EventKind},
    tasks::SessionDescriptor,
};

use super::inbound::Inbound;

/// Everything one attempt needs, moved into the spawned task.
pub(crate) struct Attempt {
    pub client: Arc<dyn SessionClient>,
    pub desc: SessionDescriptor,
    pub attempt: u32,
    pub timeout: Option<Duration>,
    pub parent: CancellationToken,
    pub bus: Bus,
    pub inbound: mpsc::Sender<Inbound>,
}

impl Attempt {
    /// Spawns the attempt onto the runtime.
    pub fn spawn(self) {
        tokio::spawn(async move {
            let task = self.desc.task;
            let result = self.run().await;
            let _ = self.inbound.send(Inbound::Created { task, result }).await;
        });
    }

    async fn run(&self) -> Result<SessionHandle, SessionError> {
        self.bus.publish(
            Event::new(EventKind::SessionCreating)
                .with_task(self.desc.task)
                .with_name(self.desc.name.as_str())
                .with_attempt(self.attempt),
        );

        let child = self.parent.child_token();
        let res = tokio::select! {
            _ = child.cancelled() => return Err(SessionError::Canceled),
            r = create_once(self.client.as_ref(), &self.desc, self.timeout) => r,
        };

        match &res {
            Ok(handle) => self.bus.publish(
                Event::new(EventKind::SessionCreated)
                    .with_task(self.desc.task)
                    .with_serial(handle.serial)
                    .with_name(Arc::clone(&handle.name))
                    .with_attempt(self.attempt),
            ),
            Err(e) => self.bus.publish(
                Event::new(EventKind::CreationFailed)
                    .with_task(self.desc.task)
                    .with_attempt(self.attempt)
                    .with_reason(e.to_string()),
            ),
        }
        res
    }
}

/// Calls `create`, bounded by `timeout` when one is set.
pub(crate) async fn create_once(
    client: &dyn SessionClient,
    desc: &SessionDescriptor,
    timeout: Option<Duration>,
) -> Result<SessionHandle, SessionError> {
    match timeout.filter(|d| *d > Duration::ZERO) {
        Some(dur) => match time::timeout(dur, client.create(desc)).await {
            Ok(r) => r,
            Err(_elapsed) => Err(SessionError::Timeout { timeout: dur }),
        },
        None => client.create(desc).await,
    }
}
