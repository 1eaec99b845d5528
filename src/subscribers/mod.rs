//! # Runtime event subscribers.
//!
//! This module provides the [`Subscribe`] trait and the [`SubscriberSet`] fan-out
//! that the host uses to deliver [`RuntimeEvent`](crate::RuntimeEvent)s.
//!
//! ## Architecture
//! ```text
//! Event flow:
//!   Registration ── publish(RuntimeEvent) ──► Bus ──► Host listener ──► SubscriberSet::emit
//!                                                                           │
//!                                                             ┌─────────────┼─────────────┐
//!                                                             ▼             ▼             ▼
//!                                                         LogWriter      Metrics       Custom
//! ```
//!
//! ## Implementing custom subscribers
//! ```no_run
//! use workervisor::{Subscribe, RuntimeEvent, RuntimeEventKind};
//! use async_trait::async_trait;
//!
//! struct InstallAlerts;
//!
//! #[async_trait]
//! impl Subscribe for InstallAlerts {
//!     async fn on_event(&self, event: &RuntimeEvent) {
//!         if event.kind == RuntimeEventKind::InstallFailed {
//!             // page someone
//!         }
//!     }
//!     fn name(&self) -> &'static str { "install-alerts" }
//! }
//! ```

mod set;
mod subscribe;

#[cfg(feature = "logging")]
mod embedded;

pub use set::SubscriberSet;
pub use subscribe::Subscribe;

#[cfg(feature = "logging")]
pub use embedded::LogWriter;
