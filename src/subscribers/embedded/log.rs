//! # LogWriter: runtime events as `tracing` records
//!
//! A minimal subscriber that renders incoming [`RuntimeEvent`]s through the
//! `tracing` macros, one record per event, with structured fields.
//!
//! ## Example output (fmt subscriber)
//! ```text
//! INFO workervisor: worker state changed worker=1 version=1 state=installing scope="/"
//! WARN workervisor: install failed worker=2 version=2 scope="/" reason="rejected: boom"
//! WARN workervisor: extension rejected worker=1 reason="fetch: rejected: upstream down"
//! INFO workervisor: cache opened cache="v1"
//! ```

use async_trait::async_trait;
use tracing::{info, warn};

use crate::events::{RuntimeEvent, RuntimeEventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &RuntimeEvent) {
        let reason = e.reason.as_deref().unwrap_or("");
        let scope = e.context.as_deref().unwrap_or("");
        match e.kind {
            RuntimeEventKind::WorkerStateChanged => {
                let state = e.state.map(|s| s.as_str()).unwrap_or("unknown");
                info!(worker = ?e.worker, version = ?e.version, state, scope, "worker state changed");
            }
            RuntimeEventKind::InstallFailed => {
                warn!(worker = ?e.worker, version = ?e.version, scope, reason, "install failed");
            }
            RuntimeEventKind::ActivateFailed => {
                warn!(worker = ?e.worker, version = ?e.version, scope, reason, "activate failed");
            }
            RuntimeEventKind::UpdateAccepted => {
                info!(worker = ?e.worker, version = ?e.version, scope, "update adopted in place");
            }
            RuntimeEventKind::UpdateDeclined => {
                info!(worker = ?e.worker, version = ?e.version, scope, "update declined");
            }
            RuntimeEventKind::WorkerDisposed => {
                info!(worker = ?e.worker, version = ?e.version, scope, "worker disposed");
            }
            RuntimeEventKind::ListenerFailed => {
                warn!(worker = ?e.worker, reason, "listener failed");
            }
            RuntimeEventKind::ExtensionRejected => {
                warn!(worker = ?e.worker, reason, "extension rejected");
            }
            RuntimeEventKind::CacheOpened => {
                info!(cache = ?e.cache, "cache opened");
            }
            RuntimeEventKind::CacheDeleted => {
                info!(cache = ?e.cache, "cache deleted");
            }
            RuntimeEventKind::ShutdownRequested => {
                info!("shutdown requested");
            }
            RuntimeEventKind::AllStoppedWithin => {
                info!("all contexts drained within grace");
            }
            RuntimeEventKind::GraceExceeded => {
                warn!("grace exceeded");
            }
            RuntimeEventKind::SubscriberOverflow => {
                warn!(subscriber = scope, reason, "subscriber overflow");
            }
            RuntimeEventKind::SubscriberPanicked => {
                warn!(subscriber = scope, reason, "subscriber panicked");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
