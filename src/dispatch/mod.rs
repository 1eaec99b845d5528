//! Event dispatch with extendable lifetimes.
//!
//! ## Contents
//! - [`ExtendableEvent`]: one dispatched occurrence (install, activate, fetch, message)
//!   with its lifetime-extension set and, for fetch events, a response slot
//! - [`Listener`] / [`Listeners`]: synchronous listener callbacks grouped by [`EventType`]
//! - [`EventDispatcher`]: runs listeners, closes the dispatch phase, settles the event
//!
//! ## Flow
//! ```text
//! create_event(kind, data) ──► ExtendableEvent (phase open)
//!        │
//! dispatch(event, listeners)
//!        ├─► listener 1 ──► wait_until(fut) / respond_with(fut)  ─┐
//!        ├─► listener 2 ──► ...                                   │ spawned, tracked
//!        └─► close phase                                          │
//!                                                                 ▼
//! settle(event) ◄── waits until phase closed AND pending == 0 ◄── extensions finish
//!        │          (a pending extension may still register more)
//!        └─► Settlement { outcome, unhandled, listener_errors }
//! ```

mod dispatcher;
mod event;
mod lifetime;
mod listener;

pub use dispatcher::{EventDispatcher, Outcome, Settlement, UnhandledExtension};
pub use event::{EventData, EventType, ExtendableEvent};
pub use listener::{Listener, Listeners};
