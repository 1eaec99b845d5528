//! # EventDispatcher: run listeners, close the phase, settle.
//!
//! ```text
//! dispatch(event, listeners)
//!   ├─ listener[i](&event)        synchronous, registration order
//!   │     ├─ Ok(())               continue
//!   │     ├─ Err(e)               record, publish ListenerFailed, continue
//!   │     └─ panic                record as Panicked, publish ListenerFailed, continue
//!   └─ close phase
//!
//! settle(event)
//!   ├─ wait: phase closed && pending == 0
//!   ├─ each rejected extension ─► warn + publish ExtensionRejected
//!   └─ Settlement { outcome, unhandled, listener_errors }
//! ```

use std::panic::AssertUnwindSafe;

use tracing::{debug, warn};

use crate::error::{ExtensionError, RuntimeError, panic_message};
use crate::events::{Bus, RuntimeEvent, RuntimeEventKind};
use crate::http::Response;

use super::event::{EventData, EventType, ExtendableEvent};
use super::listener::Listener;

/// An extension future that rejected (or panicked).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnhandledExtension {
    /// Registration index of the extension within its event.
    pub index: usize,
    /// What the extension failed with.
    pub error: ExtensionError,
}

/// Final outcome of a settled event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// A fetch event whose response was assigned and resolved.
    Response(Response),
    /// A fetch event that ended without a usable response.
    NoResponse,
    /// A non-fetch event finished.
    Completed,
}

/// Everything recorded while an event ran.
#[derive(Clone, Debug)]
pub struct Settlement {
    /// Event type.
    pub kind: EventType,
    /// Final outcome.
    pub outcome: Outcome,
    /// Rejected extensions, ordered by registration index.
    pub unhandled: Vec<UnhandledExtension>,
    /// Errors returned (or panics raised) by listeners.
    pub listener_errors: Vec<ExtensionError>,
}

impl Settlement {
    /// True if any extension rejected or any listener failed.
    pub fn failed(&self) -> bool {
        !self.unhandled.is_empty() || !self.listener_errors.is_empty()
    }

    /// All failure messages joined with `"; "`.
    pub fn failure_summary(&self) -> String {
        self.listener_errors
            .iter()
            .map(ExtensionError::to_string)
            .chain(self.unhandled.iter().map(|u| u.error.to_string()))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Maps the outcome to an HTTP response (`500` when none was assigned).
    pub fn into_response(self) -> Response {
        match self.outcome {
            Outcome::Response(resp) => resp,
            Outcome::NoResponse | Outcome::Completed => {
                Response::error(500, "no response was provided for this request")
            }
        }
    }
}

/// Builds events and drives them through listeners to settlement.
#[derive(Clone, Debug, Default)]
pub struct EventDispatcher {
    bus: Option<Bus>,
    worker: Option<u64>,
}

impl EventDispatcher {
    /// Dispatcher that reports only through `tracing`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Also publishes listener/extension failures on `bus`.
    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Tags published failures with a worker instance id.
    pub fn with_worker(mut self, worker: u64) -> Self {
        self.worker = Some(worker);
        self
    }

    /// Creates an event in the open dispatch phase.
    pub fn create_event(&self, kind: EventType, data: EventData) -> ExtendableEvent {
        ExtendableEvent::new(kind, data)
    }

    /// Runs `listeners` synchronously in order, then closes the dispatch phase.
    ///
    /// # Errors
    /// `InvalidState` if the event was already dispatched.
    pub fn dispatch(
        &self,
        event: &ExtendableEvent,
        listeners: &[Listener],
    ) -> Result<(), RuntimeError> {
        if !event.begin_dispatch() {
            return Err(RuntimeError::invalid_state(format!(
                "{} event #{} was already dispatched",
                event.kind(),
                event.id()
            )));
        }

        for listener in listeners {
            let result = match std::panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(r) => r,
                Err(payload) => Err(ExtensionError::Panicked {
                    info: panic_message(&*payload),
                }),
            };
            if let Err(err) = result {
                warn!(kind = %event.kind(), worker = ?self.worker, error = %err, "listener failed");
                self.publish(RuntimeEventKind::ListenerFailed, event.kind(), &err);
                event.record_listener_error(err);
            }
        }

        event.close_phase();
        debug!(kind = %event.kind(), event = event.id(), extensions = event.extension_count(), "dispatch phase closed");
        Ok(())
    }

    /// Waits until every tracked extension finished and reports the outcome.
    pub async fn settle(&self, event: &ExtendableEvent) -> Settlement {
        event.close_phase();
        event.wait_extensions().await;
        let (unhandled, listener_errors) = event.finish_settle();

        for u in &unhandled {
            warn!(
                kind = %event.kind(),
                worker = ?self.worker,
                index = u.index,
                label = u.error.as_label(),
                error = %u.error,
                "unhandled extension rejection"
            );
            self.publish(RuntimeEventKind::ExtensionRejected, event.kind(), &u.error);
        }

        let outcome = match event.kind() {
            EventType::Fetch => match event.take_response() {
                Some(resp) => Outcome::Response(resp),
                None => Outcome::NoResponse,
            },
            _ => Outcome::Completed,
        };

        Settlement {
            kind: event.kind(),
            outcome,
            unhandled,
            listener_errors,
        }
    }

    /// [`dispatch`](Self::dispatch) followed by [`settle`](Self::settle).
    pub async fn dispatch_and_settle(
        &self,
        event: &ExtendableEvent,
        listeners: &[Listener],
    ) -> Result<Settlement, RuntimeError> {
        self.dispatch(event, listeners)?;
        Ok(self.settle(event).await)
    }

    fn publish(&self, kind: RuntimeEventKind, event: EventType, err: &ExtensionError) {
        if let Some(bus) = &self.bus {
            let mut ev = RuntimeEvent::new(kind).with_reason(format!("{event}: {err}"));
            if let Some(worker) = self.worker {
                ev = ev.with_worker(worker);
            }
            bus.publish(ev);
        }
    }
}
