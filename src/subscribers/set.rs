//! # SubscriberSet: one queue and one worker task per subscriber.
//!
//! ```text
//! emit_arc(ev)
//!   for each slot:
//!     slot.sub.accepts(ev.kind)? ── no ──► skip
//!     try_send(ev) ── Full / Closed ──► bus: SubscriberOverflow (unless ev is one)
//!                   └─ Ok ──► worker ──► on_event(ev)
//!                                          └─ panic ──► bus: SubscriberPanicked
//! ```
//!
//! Delivery is FIFO per subscriber; there is no ordering across subscribers.
//! Panics are caught with `AssertUnwindSafe`, so a subscriber that panics while
//! holding a lock may leave its own state inconsistent.

use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::panic_message;
use crate::events::{Bus, RuntimeEvent, RuntimeEventKind};
use crate::subscribers::Subscribe;

struct Slot {
    sub: Arc<dyn Subscribe>,
    queue: mpsc::Sender<Arc<RuntimeEvent>>,
}

/// Fans runtime events out to every registered [`Subscribe`] implementation.
pub struct SubscriberSet {
    slots: Vec<Slot>,
    workers: Vec<JoinHandle<()>>,
    bus: Bus,
}

impl SubscriberSet {
    /// Spawns one worker per subscriber. Must be called inside a tokio runtime.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>, bus: Bus) -> Self {
        let (slots, workers) = subs
            .into_iter()
            .map(|sub| {
                let (queue, rx) = mpsc::channel(sub.queue_capacity().max(1));
                let worker = tokio::spawn(drive(Arc::clone(&sub), rx, bus.clone()));
                (Slot { sub, queue }, worker)
            })
            .unzip();
        Self {
            slots,
            workers,
            bus,
        }
    }

    /// Queues a copy of `event` for every interested subscriber.
    pub fn emit(&self, event: &RuntimeEvent) {
        self.emit_arc(Arc::new(event.clone()));
    }

    /// Queues `event` for every interested subscriber without copying it.
    ///
    /// An overflow report that itself overflows is dropped silently.
    pub fn emit_arc(&self, event: Arc<RuntimeEvent>) {
        let report = event.kind != RuntimeEventKind::SubscriberOverflow;
        for slot in self.slots.iter().filter(|s| s.sub.accepts(event.kind)) {
            let reason = match slot.queue.try_send(Arc::clone(&event)) {
                Ok(()) => continue,
                Err(TrySendError::Full(_)) => "full",
                Err(TrySendError::Closed(_)) => "closed",
            };
            if report {
                self.bus
                    .publish(RuntimeEvent::subscriber_overflow(slot.sub.name(), reason));
            }
        }
    }

    /// Number of subscribers.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True if there are no subscribers.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Closes every queue and waits until each worker has handled what was queued.
    pub async fn shutdown(self) {
        drop(self.slots);
        for worker in self.workers {
            let _ = worker.await;
        }
        debug!("subscriber workers finished");
    }
}

async fn drive(sub: Arc<dyn Subscribe>, mut rx: mpsc::Receiver<Arc<RuntimeEvent>>, bus: Bus) {
    while let Some(ev) = rx.recv().await {
        let handled = std::panic::AssertUnwindSafe(sub.on_event(&ev))
            .catch_unwind()
            .await;
        if let Err(payload) = handled {
            let info = panic_message(&*payload);
            warn!(subscriber = sub.name(), %info, "subscriber panicked");
            bus.publish(RuntimeEvent::subscriber_panicked(sub.name(), info));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct Recorder {
        seen: Arc<Mutex<Vec<RuntimeEventKind>>>,
        only: Option<RuntimeEventKind>,
    }

    #[async_trait]
    impl Subscribe for Recorder {
        async fn on_event(&self, event: &RuntimeEvent) {
            self.seen.lock().push(event.kind);
        }
        fn name(&self) -> &'static str {
            "recorder"
        }
        fn accepts(&self, kind: RuntimeEventKind) -> bool {
            self.only.is_none_or(|only| only == kind)
        }
    }

    struct Panicker;

    #[async_trait]
    impl Subscribe for Panicker {
        async fn on_event(&self, _event: &RuntimeEvent) {
            panic!("subscriber exploded");
        }
        fn name(&self) -> &'static str {
            "panicker"
        }
    }

    #[tokio::test]
    async fn delivers_in_order_and_isolates_panics() {
        let bus = Bus::new(16);
        let mut bus_rx = bus.subscribe();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let set = SubscriberSet::new(
            vec![
                Arc::new(Recorder {
                    seen: seen.clone(),
                    only: None,
                }),
                Arc::new(Panicker),
            ],
            bus.clone(),
        );
        assert_eq!(set.len(), 2);

        set.emit(&RuntimeEvent::new(RuntimeEventKind::CacheOpened));
        set.emit(&RuntimeEvent::new(RuntimeEventKind::CacheDeleted));

        let panicked = bus_rx.recv().await.expect("panic event");
        assert_eq!(panicked.kind, RuntimeEventKind::SubscriberPanicked);
        assert_eq!(panicked.context.as_deref(), Some("panicker"));

        set.shutdown().await;
        assert_eq!(
            *seen.lock(),
            vec![RuntimeEventKind::CacheOpened, RuntimeEventKind::CacheDeleted]
        );
    }

    #[tokio::test]
    async fn filtered_kinds_are_never_queued() {
        let bus = Bus::new(16);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let set = SubscriberSet::new(
            vec![Arc::new(Recorder {
                seen: seen.clone(),
                only: Some(RuntimeEventKind::InstallFailed),
            })],
            bus,
        );

        set.emit(&RuntimeEvent::new(RuntimeEventKind::CacheOpened));
        set.emit(&RuntimeEvent::new(RuntimeEventKind::InstallFailed));
        set.shutdown().await;

        assert_eq!(*seen.lock(), vec![RuntimeEventKind::InstallFailed]);
    }
}
