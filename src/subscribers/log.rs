//! # Structured logging subscriber.
//!
//! [`LogWriter`] turns every [`Event`] into a `tracing` record. Routine
//! progress goes to `info`/`debug`, trouble to `warn`/`error`; the fields
//! carry enough to rerun a single task (`date`, `partition`) or find it on
//! the platform (`serial`, `session`).
//!
//! ```text
//! INFO  session created date=2024-01-02 partition=Some(1) serial=Some(7) session="replay_sim_20240102_1" attempt=Some(1)
//! WARN  retry scheduled date=2024-01-02 partition=Some(1) attempt=Some(2) delay_ms=Some(2000) reason="creation failed: ..."
//! ERROR session failed, left for inspection date=2024-01-02 partition=Some(1) serial=Some(7) reason="..."
//! ```

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};

use super::Subscribe;

/// `tracing`-backed subscriber, installed by the binary.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogWriter;

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let date = e.task.map(|t| t.date.to_string()).unwrap_or_default();
        let partition = e.task.map(|t| t.partition);
        let serial = e.serial;
        let session = e.name.as_deref().unwrap_or("");
        let attempt = e.attempt;
        let reason = e.reason.as_deref().unwrap_or("");

        match e.kind {
            EventKind::SessionCreating => {
                debug!(%date, ?partition, ?attempt, session, "creating session");
            }
            EventKind::SessionCreated => {
                info!(%date, ?partition, ?serial, session, ?attempt, "session created");
            }
            EventKind::CreationFailed => {
                warn!(%date, ?partition, ?attempt, reason, "session creation failed");
            }
            EventKind::RetryScheduled => {
                warn!(%date, ?partition, ?attempt, delay_ms = ?e.delay_ms, reason, "retry scheduled");
            }
            EventKind::TaskAbandoned => {
                error!(%date, ?partition, reason, "task abandoned");
            }
            EventKind::StatusChanged => {
                debug!(%date, ?partition, ?serial, status = reason, "status changed");
            }
            EventKind::SessionCompleted => {
                info!(%date, ?partition, ?serial, session, elapsed = reason, "session completed");
            }
            EventKind::SessionFailed => {
                error!(%date, ?partition, ?serial, session, reason, "session failed, left for inspection");
            }
            EventKind::ResourceUnavailable => {
                warn!(%date, ?partition, ?serial, reason, "no platform capacity, deleting and re-queueing");
            }
            EventKind::StallDetected => {
                warn!(threshold = ?attempt, "no progress: {reason}");
            }
            EventKind::FailureLimitReached => {
                error!("failure limit reached: {reason}");
            }
            EventKind::ShutdownRequested => {
                warn!("shutdown requested, draining: {reason}");
            }
            EventKind::ForcedTermination => {
                warn!("second interrupt, terminating now: {reason}");
            }
            EventKind::SessionDeleted => {
                debug!(%date, ?partition, ?serial, session, "session deleted");
            }
            EventKind::DeleteFailed => {
                warn!(%date, ?partition, ?serial, session, reason, "session delete failed");
            }
            EventKind::RunFinished => {
                info!("run finished: {reason}");
            }
            EventKind::SubscriberPanicked | EventKind::SubscriberOverflow => {
                warn!(subscriber = session, reason, "subscriber trouble");
            }
        }
    }

    fn name(&self) -> &'static str {
        "log"
    }

    fn queue_capacity(&self) -> usize {
        4096
    }
}
