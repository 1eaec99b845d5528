//! # Extendable events.
//!
//! [`ExtendableEvent`] is a cheap-to-clone handle: listeners can move clones into
//! the futures they pass to [`wait_until`](ExtendableEvent::wait_until) and keep
//! extending the event from those continuations.
//!
//! ## Rules
//! - Extensions are accepted while the dispatch phase is open, or later while
//!   another extension of the same event is still pending.
//! - [`respond_with`](ExtendableEvent::respond_with) succeeds at most once per fetch
//!   event; a second call fails with `InvalidState` and the first stays in effect.
//! - Extension futures are spawned on the current tokio runtime.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{ExtensionError, RuntimeError, panic_message};
use crate::http::{Request, Response};

use super::lifetime::Lifetime;

static EVENT_IDS: AtomicU64 = AtomicU64::new(1);

/// Event type tag listeners are registered against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Fired once on a new worker instance before it can be promoted.
    Install,
    /// Fired when a worker instance is promoted to the active slot.
    Activate,
    /// One inbound request/response cycle.
    Fetch,
    /// A message posted to the worker.
    Message,
}

impl EventType {
    /// Lower-case name as used by worker code (`"install"`, `"fetch"`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Install => "install",
            EventType::Activate => "activate",
            EventType::Fetch => "fetch",
            EventType::Message => "message",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload an event is created with.
#[derive(Clone, Debug)]
pub enum EventData {
    /// Lifecycle events carry nothing.
    None,
    /// Fetch events carry the inbound request.
    Request(Request),
    /// Message events carry an opaque JSON payload.
    Message(Value),
}

struct ResponseSlot {
    assigned: AtomicBool,
    value: Mutex<Option<Response>>,
}

struct EventInner {
    id: u64,
    kind: EventType,
    data: EventData,
    lifetime: Lifetime,
    dispatched: AtomicBool,
    settled: AtomicBool,
    listener_errors: Mutex<Vec<ExtensionError>>,
    response: Option<Arc<ResponseSlot>>,
}

/// A dispatched occurrence whose completion can be extended.
#[derive(Clone)]
pub struct ExtendableEvent {
    inner: Arc<EventInner>,
}

impl fmt::Debug for ExtendableEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtendableEvent")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("active", &self.is_active())
            .field("settled", &self.is_settled())
            .finish()
    }
}

impl ExtendableEvent {
    pub(crate) fn new(kind: EventType, data: EventData) -> Self {
        let response = matches!(kind, EventType::Fetch).then(|| {
            Arc::new(ResponseSlot {
                assigned: AtomicBool::new(false),
                value: Mutex::new(None),
            })
        });
        Self {
            inner: Arc::new(EventInner {
                id: EVENT_IDS.fetch_add(1, Ordering::Relaxed),
                kind,
                data,
                lifetime: Lifetime::new(),
                dispatched: AtomicBool::new(false),
                settled: AtomicBool::new(false),
                listener_errors: Mutex::new(Vec::new()),
                response,
            }),
        }
    }

    /// Process-unique event id.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Event type tag.
    pub fn kind(&self) -> EventType {
        self.inner.kind
    }

    /// The inbound request (fetch events only).
    pub fn request(&self) -> Option<&Request> {
        match &self.inner.data {
            EventData::Request(req) => Some(req),
            _ => None,
        }
    }

    /// The posted payload (message events only).
    pub fn data(&self) -> Option<&Value> {
        match &self.inner.data {
            EventData::Message(v) => Some(v),
            _ => None,
        }
    }

    /// True while `wait_until`/`respond_with` would be accepted.
    pub fn is_active(&self) -> bool {
        self.inner.lifetime.is_active()
    }

    /// True once the dispatch phase has been closed.
    pub fn is_phase_closed(&self) -> bool {
        !self.inner.lifetime.is_open()
    }

    /// True once the event has been settled.
    pub fn is_settled(&self) -> bool {
        self.inner.settled.load(Ordering::Acquire)
    }

    /// True once a response was assigned (successfully or not).
    pub fn response_assigned(&self) -> bool {
        self.inner
            .response
            .as_ref()
            .is_some_and(|slot| slot.assigned.load(Ordering::Acquire))
    }

    /// Number of extensions accepted so far (including `respond_with`).
    pub fn extension_count(&self) -> usize {
        self.inner.lifetime.registered()
    }

    /// Extends the event's lifetime until `fut` completes.
    ///
    /// A future resolving to `Err` (or panicking) is recorded as an unhandled
    /// extension; it does not cancel sibling extensions.
    ///
    /// # Errors
    /// `InvalidState` once the phase is closed and no other extension is pending.
    pub fn wait_until<F>(&self, fut: F) -> Result<(), RuntimeError>
    where
        F: Future<Output = Result<(), ExtensionError>> + Send + 'static,
    {
        let index = self.inner.lifetime.try_register().ok_or_else(|| {
            RuntimeError::invalid_state(format!(
                "{} event is no longer active; wait_until refused",
                self.inner.kind
            ))
        })?;
        self.spawn_tracked(index, fut);
        Ok(())
    }

    /// Assigns the response of a fetch event from a future.
    ///
    /// The future also extends the event's lifetime; if it fails, the event ends
    /// with no response.
    ///
    /// # Errors
    /// `InvalidState` on non-fetch events, on a second call, or when the event is
    /// no longer active.
    pub fn respond_with<F>(&self, fut: F) -> Result<(), RuntimeError>
    where
        F: Future<Output = Result<Response, ExtensionError>> + Send + 'static,
    {
        let Some(slot) = self.inner.response.as_ref() else {
            return Err(RuntimeError::invalid_state(format!(
                "respond_with is not available on {} events",
                self.inner.kind
            )));
        };
        if slot
            .assigned
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RuntimeError::invalid_state(
                "respond_with has already been called for this fetch event",
            ));
        }
        let Some(index) = self.inner.lifetime.try_register() else {
            slot.assigned.store(false, Ordering::Release);
            return Err(RuntimeError::invalid_state(
                "fetch event is no longer active; respond_with refused",
            ));
        };

        let slot = Arc::clone(slot);
        self.spawn_tracked(index, async move {
            let response = fut.await?;
            *slot.value.lock() = Some(response);
            Ok(())
        });
        Ok(())
    }

    /// Assigns an already-built response.
    pub fn respond(&self, response: Response) -> Result<(), RuntimeError> {
        self.respond_with(async move { Ok(response) })
    }

    fn spawn_tracked<F>(&self, index: usize, fut: F)
    where
        F: Future<Output = Result<(), ExtensionError>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let result = match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(r) => r,
                Err(payload) => Err(ExtensionError::Panicked {
                    info: panic_message(&*payload),
                }),
            };
            inner.lifetime.finish(index, result);
        });
    }

    // ---- dispatcher hooks ----

    pub(crate) fn begin_dispatch(&self) -> bool {
        !self.inner.dispatched.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn close_phase(&self) {
        self.inner.lifetime.close();
    }

    pub(crate) fn record_listener_error(&self, err: ExtensionError) {
        self.inner.listener_errors.lock().push(err);
    }

    pub(crate) async fn wait_extensions(&self) {
        self.inner.lifetime.wait().await;
    }

    pub(crate) fn finish_settle(&self) -> (Vec<super::UnhandledExtension>, Vec<ExtensionError>) {
        self.inner.settled.store(true, Ordering::Release);
        let unhandled = self.inner.lifetime.take_rejected();
        let listener_errors = std::mem::take(&mut *self.inner.listener_errors.lock());
        (unhandled, listener_errors)
    }

    pub(crate) fn take_response(&self) -> Option<Response> {
        self.inner
            .response
            .as_ref()
            .and_then(|slot| slot.value.lock().take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_respond_is_rejected_and_first_kept() {
        let ev = ExtendableEvent::new(EventType::Fetch, EventData::Request(Request::get("/a")));
        ev.respond(Response::ok("first")).expect("first respond");
        let err = ev.respond(Response::ok("second")).expect_err("second respond");
        assert_eq!(err.as_label(), "invalid_state");
        assert!(ev.response_assigned());

        ev.close_phase();
        ev.wait_extensions().await;
        assert_eq!(ev.take_response().map(|r| r.text()), Some("first".to_string()));
    }

    #[tokio::test]
    async fn respond_with_on_install_event_is_invalid() {
        let ev = ExtendableEvent::new(EventType::Install, EventData::None);
        assert!(ev.respond(Response::ok("x")).is_err());
        assert!(!ev.response_assigned());
    }

    #[tokio::test]
    async fn late_respond_after_close_is_refused_without_consuming_the_slot() {
        let ev = ExtendableEvent::new(EventType::Fetch, EventData::Request(Request::get("/a")));
        ev.close_phase();
        assert!(ev.respond(Response::ok("late")).is_err());
        assert!(!ev.response_assigned());
        assert!(ev.wait_until(async { Ok(()) }).is_err());
    }

    #[test]
    fn accessors_follow_event_data() {
        let ev = ExtendableEvent::new(EventType::Message, EventData::Message(serde_json::json!({"n": 1})));
        assert_eq!(ev.kind().as_str(), "message");
        assert!(ev.request().is_none());
        assert_eq!(ev.data().and_then(|v| v["n"].as_i64()), Some(1));
    }
}
