//! # SubscriberSet: per-subscriber queues behind one `emit`.
//!
//! The orchestrator's listener hands every bus event to [`SubscriberSet::emit`],
//! which copies it into one bounded queue per subscriber and returns at once.
//! A worker task per subscriber drains its queue in order.
//!
//! ```text
//!    emit(&Event)                   (one Arc per event)
//!        ├──► [queue log]    ─► worker ─► LogWriter::on_event()
//!        ├──► [queue custom] ─► worker ─► Custom::on_event()
//!        └──► ...
//!
//!    queue full     ─► drop, count, publish SubscriberOverflow (once per burst)
//!    on_event panic ─► catch, publish SubscriberPanicked, keep the worker alive
//! ```
//!
//! Subscriber trouble events are never re-reported, so a subscriber that panics
//! on everything cannot feed itself.
//!
//! [`shutdown`](SubscriberSet::shutdown) closes the queues and waits until every
//! worker has processed what it was given, then logs per-subscriber drop totals.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures::FutureExt;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::warn;

use crate::events::{Bus, Event};

use super::Subscribe;

struct Queue {
    name: &'static str,
    tx: mpsc::Sender<Arc<Event>>,
    dropped: AtomicU64,
    overflowing: AtomicBool,
}

/// Fan-out over subscribers with isolated, bounded queues.
pub struct SubscriberSet {
    queues: Vec<Queue>,
    workers: Vec<JoinHandle<()>>,
    bus: Bus,
}

impl SubscriberSet {
    /// Spawns one worker per subscriber; trouble is reported on `bus`.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>, bus: Bus) -> Self {
        let mut queues = Vec::with_capacity(subs.len());
        let mut workers = Vec::with_capacity(subs.len());

        for sub in subs {
            let name = sub.name();
            let (tx, rx) = mpsc::channel::<Arc<Event>>(sub.queue_capacity().max(1));
            workers.push(tokio::spawn(work(sub, rx, bus.clone())));
            queues.push(Queue {
                name,
                tx,
                dropped: AtomicU64::new(0),
                overflowing: AtomicBool::new(false),
            });
        }

        Self {
            queues,
            workers,
            bus,
        }
    }

    /// Queues `event` for every subscriber without waiting.
    ///
    /// A subscriber whose queue is full (or whose worker is gone) misses the
    /// event.
    pub fn emit(&self, event: &Event) {
        let ev = Arc::new(event.clone());
        for q in &self.queues {
            match q.tx.try_send(Arc::clone(&ev)) {
                Ok(()) => q.overflowing.store(false, Ordering::Relaxed),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    q.dropped.fetch_add(1, Ordering::Relaxed);
                    let first = !q.overflowing.swap(true, Ordering::Relaxed);
                    if first && !ev.is_subscriber_trouble() {
                        self.bus.publish(Event::subscriber_overflow(q.name, "queue full"));
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    q.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Events `subscriber` has missed so far.
    #[cfg(test)]
    fn dropped(&self, subscriber: &str) -> u64 {
        self.queues
            .iter()
            .filter(|q| q.name == subscriber)
            .map(|q| q.dropped.load(Ordering::Relaxed))
            .sum()
    }

    /// Closes every queue and waits for the workers to drain them.
    pub async fn shutdown(self) {
        for q in &self.queues {
            let dropped = q.dropped.load(Ordering::Relaxed);
            if dropped > 0 {
                warn!(subscriber = q.name, dropped, "subscriber missed events");
            }
        }
        drop(self.queues);
        for h in self.workers {
            let _ = h.await;
        }
    }
}

async fn work(sub: Arc<dyn Subscribe>, mut rx: mpsc::Receiver<Arc<Event>>, bus: Bus) {
    while let Some(ev) = rx.recv().await {
        let fut = sub.on_event(ev.as_ref());
        if let Err(payload) = std::panic::AssertUnwindSafe(fut).catch_unwind().await {
            let info = panic_message(payload.as_ref());
            warn!(subscriber = sub.name(), panic = %info, "subscriber panicked");
            if !ev.is_subscriber_trouble() {
                bus.publish(Event::subscriber_panicked(sub.name(), info));
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::events::EventKind;

    #[derive(Default)]
    struct Collect(Mutex<Vec<EventKind>>);

    #[async_trait]
    impl Subscribe for Collect {
        async fn on_event(&self, ev: &Event) {
            self.0.lock().unwrap().push(ev.kind);
        }
        fn name(&self) -> &'static str {
            "collect"
        }
    }

    struct Panicky;

    #[async_trait]
    impl Subscribe for Panicky {
        async fn on_event(&self, _ev: &Event) {
            panic!("boom");
        }
        fn name(&self) -> &'static str {
            "panicky"
        }
    }

    struct Slow;

    #[async_trait]
    impl Subscribe for Slow {
        async fn on_event(&self, _ev: &Event) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        fn name(&self) -> &'static str {
            "slow"
        }
        fn queue_capacity(&self) -> usize {
            1
        }
    }

    #[tokio::test]
    async fn panics_are_isolated_and_reported() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let collect = Arc::new(Collect::default());
        let subs: Vec<Arc<dyn Subscribe>> = vec![collect.clone(), Arc::new(Panicky)];
        let set = SubscriberSet::new(subs, bus);

        set.emit(&Event::new(EventKind::SessionCreating));
        set.emit(&Event::new(EventKind::SessionCreated));
        set.emit(&Event::new(EventKind::SessionCompleted));
        set.shutdown().await;

        assert_eq!(
            *collect.0.lock().unwrap(),
            vec![
                EventKind::SessionCreating,
                EventKind::SessionCreated,
                EventKind::SessionCompleted
            ]
        );
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::SubscriberPanicked);
        assert_eq!(ev.name.as_deref(), Some("panicky"));
        assert_eq!(ev.reason.as_deref(), Some("boom"));
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_drops_and_reports_once_per_burst() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(Slow)];
        let set = SubscriberSet::new(subs, bus);

        // First event is taken by the worker, second fills the queue.
        set.emit(&Event::new(EventKind::SessionCreating));
        tokio::task::yield_now().await;
        for _ in 0..4 {
            set.emit(&Event::new(EventKind::StatusChanged));
        }

        assert!(set.dropped("slow") >= 3);
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::SubscriberOverflow);
        assert!(rx.try_recv().is_err());
    }
}
