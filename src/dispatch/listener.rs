//! Listener callbacks grouped by event type.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ExtensionError;

use super::event::{EventType, ExtendableEvent};

/// Synchronous listener callback.
///
/// Runs inside `dispatch`; async work is attached with
/// [`ExtendableEvent::wait_until`] or [`ExtendableEvent::respond_with`].
/// Returning `Err` reports the failure without stopping the remaining listeners.
pub type Listener = Arc<dyn Fn(&ExtendableEvent) -> Result<(), ExtensionError> + Send + Sync>;

/// Listeners by event type, each list kept in registration order.
#[derive(Clone, Default)]
pub struct Listeners {
    by_kind: HashMap<EventType, Vec<Listener>>,
}

impl Listeners {
    /// Creates an empty listener table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a listener for `kind`.
    pub fn add<F>(&mut self, kind: EventType, listener: F)
    where
        F: Fn(&ExtendableEvent) -> Result<(), ExtensionError> + Send + Sync + 'static,
    {
        self.by_kind.entry(kind).or_default().push(Arc::new(listener));
    }

    /// Listeners registered for `kind`, in registration order.
    pub fn for_kind(&self, kind: EventType) -> &[Listener] {
        self.by_kind.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of listeners registered for `kind`.
    pub fn count(&self, kind: EventType) -> usize {
        self.for_kind(kind).len()
    }

    /// True when no listener of any kind is registered.
    pub fn is_empty(&self) -> bool {
        self.by_kind.values().all(Vec::is_empty)
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut m = f.debug_map();
        for (kind, list) in &self.by_kind {
            m.entry(&kind.as_str(), &list.len());
        }
        m.finish()
    }
}
