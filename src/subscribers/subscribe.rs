use async_trait::async_trait;

use crate::events::{RuntimeEvent, RuntimeEventKind};

/// Observer of runtime events delivered by the [`SubscriberSet`](crate::SubscriberSet).
///
/// Every subscriber gets its own bounded queue and worker task, so a slow
/// `on_event` only delays itself. When the queue is full the event is dropped
/// for this subscriber and a `SubscriberOverflow` event is published instead.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handles one event.
    async fn on_event(&self, event: &RuntimeEvent);

    /// Name used in overflow/panic reports.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Queue capacity for this subscriber (min 1).
    fn queue_capacity(&self) -> usize {
        1024
    }

    /// Whether events of `kind` should be queued at all.
    ///
    /// Filtered events never take queue space.
    fn accepts(&self, kind: RuntimeEventKind) -> bool {
        let _ = kind;
        true
    }
}
