//! # Runtime events emitted by the host, registrations and dispatcher.
//!
//! The [`RuntimeEventKind`] enum classifies event types across four categories:
//! - **Lifecycle events**: worker state transitions and lifecycle failures
//! - **Dispatch events**: listener failures and rejected extensions
//! - **Cache events**: caches opened/deleted in a storage
//! - **Runtime events**: shutdown progress and subscriber health
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use workervisor::{RuntimeEvent, RuntimeEventKind};
//!
//! let ev = RuntimeEvent::new(RuntimeEventKind::InstallFailed)
//!     .with_worker(3)
//!     .with_version(2)
//!     .with_reason("boom");
//!
//! assert_eq!(ev.kind, RuntimeEventKind::InstallFailed);
//! assert_eq!(ev.worker, Some(3));
//! assert_eq!(ev.reason.as_deref(), Some("boom"));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

use crate::registration::WorkerState;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeEventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets:
    /// - `context`: subscriber name
    /// - `reason`: panic info/message
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets:
    /// - `context`: subscriber name
    /// - `reason`: reason string (e.g., "full", "closed")
    SubscriberOverflow,

    // === Shutdown events ===
    /// Shutdown requested (OS signal observed or explicit call).
    ShutdownRequested,

    /// Every context drained within the configured grace period.
    AllStoppedWithin,

    /// Grace period exceeded; some contexts did not drain in time.
    GraceExceeded,

    // === Lifecycle events ===
    /// A worker instance moved to a new state.
    ///
    /// Sets:
    /// - `worker`: instance id
    /// - `version`: registration version of the instance
    /// - `state`: the new state
    /// - `context`: registration scope
    WorkerStateChanged,

    /// Install settlement failed; the instance became redundant.
    ///
    /// Sets:
    /// - `worker`, `version`, `context`
    /// - `reason`: joined extension failures
    InstallFailed,

    /// Activate settlement failed; the instance became redundant.
    ///
    /// Sets:
    /// - `worker`, `version`, `context`
    /// - `reason`: joined extension failures
    ActivateFailed,

    /// The active worker adopted new code in place (hot accept).
    ///
    /// Sets:
    /// - `worker`, `version` (the bumped version), `context`
    UpdateAccepted,

    /// The active worker declined an update; a full lifecycle replay follows.
    ///
    /// Sets:
    /// - `worker`, `version`, `context`
    UpdateDeclined,

    /// A disposal hook ran on an outgoing worker scope.
    ///
    /// Sets:
    /// - `worker`, `version`, `context`
    WorkerDisposed,

    // === Dispatch events ===
    /// A listener returned an error (remaining listeners still ran).
    ///
    /// Sets:
    /// - `worker`: instance id (when dispatched through a registration)
    /// - `reason`: `<event type>: <message>`
    ListenerFailed,

    /// A lifetime extension rejected.
    ///
    /// Sets:
    /// - `worker`: instance id (when dispatched through a registration)
    /// - `reason`: `<event type>: <message>`
    ExtensionRejected,

    // === Cache events ===
    /// A cache was created in a storage.
    ///
    /// Sets:
    /// - `cache`: cache name
    CacheOpened,

    /// A cache was removed and disposed.
    ///
    /// Sets:
    /// - `cache`: cache name
    CacheDeleted,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`RuntimeEventKind`]
#[derive(Clone, Debug)]
pub struct RuntimeEvent {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: RuntimeEventKind,

    /// Worker instance id, if applicable.
    pub worker: Option<u64>,
    /// Registration version, if applicable.
    pub version: Option<u64>,
    /// Worker state after a transition.
    pub state: Option<WorkerState>,
    /// Registration scope, context or subscriber name.
    pub context: Option<Arc<str>>,
    /// Cache name, if applicable.
    pub cache: Option<Arc<str>>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
}

impl RuntimeEvent {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: RuntimeEventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            worker: None,
            version: None,
            state: None,
            context: None,
            cache: None,
            reason: None,
        }
    }

    /// Attaches a worker instance id.
    #[inline]
    pub fn with_worker(mut self, id: u64) -> Self {
        self.worker = Some(id);
        self
    }

    /// Attaches a registration version.
    #[inline]
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    /// Attaches a worker state.
    #[inline]
    pub fn with_state(mut self, state: WorkerState) -> Self {
        self.state = Some(state);
        self
    }

    /// Attaches a scope/context/subscriber name.
    #[inline]
    pub fn with_context(mut self, context: impl Into<Arc<str>>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Attaches a cache name.
    #[inline]
    pub fn with_cache(mut self, cache: impl Into<Arc<str>>) -> Self {
        self.cache = Some(cache.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        RuntimeEvent::new(RuntimeEventKind::SubscriberOverflow)
            .with_context(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        RuntimeEvent::new(RuntimeEventKind::SubscriberPanicked)
            .with_context(subscriber)
            .with_reason(info)
    }
}
