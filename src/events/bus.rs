//! # Per-run broadcast of lifecycle events.
//!
//! One [`Bus`] lives for one orchestrator run. Everything that publishes
//! shares a clone of it:
//!
//! ```text
//!   control loop ──┐
//!   creations    ──┼──► Bus::publish ──stamp seq──► broadcast ──► listener ──► SubscriberSet
//!   cleanup      ──┤
//!   subscribers  ──┘  (overflow / panic reports)
//! ```
//!
//! `publish` stamps [`Event::seq`] and sends under one lock, so sequence
//! numbers start at 1 for every run and follow delivery order exactly. A
//! receiver that sees a gap lagged behind the ring buffer.
//!
//! Publishing never waits. Events published while nobody listens are lost;
//! no orchestration decision depends on them.

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for the events of one run.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
    seq: Arc<Mutex<u64>>,
}

impl Bus {
    /// Creates a bus keeping the last `capacity` events (minimum 1) per receiver.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self {
            tx,
            seq: Arc::new(Mutex::new(0)),
        }
    }

    /// Stamps the next sequence number on `ev` and broadcasts it.
    pub fn publish(&self, mut ev: Event) {
        let mut seq = self.seq.lock().unwrap_or_else(|e| e.into_inner());
        *seq += 1;
        ev.seq = *seq;
        let _ = self.tx.send(ev);
    }

    /// Events published so far on this bus.
    pub fn published(&self) -> u64 {
        *self.seq.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Receiver for events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[tokio::test]
    async fn receivers_see_events_published_after_subscribing() {
        let bus = Bus::new(0);
        bus.publish(Event::new(EventKind::RunFinished));

        let mut rx = bus.subscribe();
        bus.publish(Event::new(EventKind::StallDetected));
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::StallDetected);
        assert_eq!(ev.seq, 2);
        assert_eq!(bus.published(), 2);
    }

    #[tokio::test]
    async fn each_run_numbers_its_own_events() {
        let first = Bus::new(8);
        let second = Bus::new(8);
        let mut rx = second.subscribe();

        first.publish(Event::new(EventKind::SessionCreating));
        first.publish(Event::new(EventKind::SessionCreated));
        second.publish(Event::new(EventKind::SessionCreating));

        assert_eq!(rx.recv().await.unwrap().seq, 1);
        assert_eq!(first.published(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn sequence_follows_delivery_order() {
        let bus = Bus::new(1024);
        let mut rx = bus.subscribe();

        let publishers: Vec<_> = (0..4)
            .map(|_| {
                let bus = bus.clone();
                tokio::spawn(async move {
                    for _ in 0..100 {
                        bus.publish(Event::new(EventKind::StatusChanged));
                    }
                })
            })
            .collect();
        for p in publishers {
            p.await.unwrap();
        }

        let mut expected = 1;
        while let Ok(ev) = rx.try_recv() {
            assert_eq!(ev.seq, expected);
            expected += 1;
        }
        assert_eq!(expected, 401);
    }
}
