//! # Runtime event bus.
//!
//! ```text
//!   Registration ─┐
//!   Dispatcher   ─┤ publish ──► [ ring of `capacity` events ] ──► Host listener ──► SubscriberSet
//!   CacheStorage ─┤
//!   Host         ─┘
//! ```
//!
//! Publishing never waits. Events sent while nobody listens are gone, and a
//! receiver that falls `n` events behind skips them (`RecvError::Lagged(n)`).

use tokio::sync::broadcast;

use super::event::RuntimeEvent;

/// Cloneable, fire-and-forget publisher of [`RuntimeEvent`]s.
#[derive(Clone, Debug)]
pub struct Bus {
    ring: broadcast::Sender<RuntimeEvent>,
}

impl Bus {
    /// Bus holding up to `capacity` undelivered events (min 1).
    pub fn new(capacity: usize) -> Self {
        let (ring, _) = broadcast::channel(capacity.max(1));
        Self { ring }
    }

    /// Publishes `ev`; dropped when there is no receiver.
    pub fn publish(&self, ev: RuntimeEvent) {
        if self.ring.send(ev).is_err() {
            tracing::trace!("runtime event published with no listener");
        }
    }

    /// Receiver observing events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.ring.subscribe()
    }

    /// Number of live receivers.
    pub fn listeners(&self) -> usize {
        self.ring.receiver_count()
    }
}
