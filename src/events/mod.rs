//! Runtime events: types and broadcast bus.
//!
//! This module groups the observability **data model** and the **bus** used to
//! publish/subscribe to runtime events emitted by the host, registrations, the
//! event dispatcher, cache storage and subscriber workers.
//!
//! These are not the events worker code listens to (see [`crate::dispatch`]);
//! they describe what the runtime did with them.
//!
//! ## Contents
//! - [`RuntimeEventKind`], [`RuntimeEvent`] classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Host`, `Registration`, `EventDispatcher`, `CacheStorage`,
//!   `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the host's subscriber listener (fans out to `SubscriberSet`).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{RuntimeEvent, RuntimeEventKind};
