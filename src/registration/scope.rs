//! # WorkerScope: what a script sees while it is evaluated.
//!
//! ```text
//! WorkerEnv (shared by every instance of a registration)
//!   ├─ caches      Arc<dyn CacheStorageApi>   local storage or relay client
//!   ├─ broadcast   Arc<BroadcastRelay>
//!   ├─ scheduler   Arc<TaskScheduler>
//!   └─ bus         Option<Bus>
//!
//! WorkerScope (one per evaluation)
//!   ├─ env
//!   ├─ listeners   filled by add_event_listener / on_*
//!   └─ hot         HotContext of this evaluation
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::broadcast::BroadcastRelay;
use crate::cache::CacheStorageApi;
use crate::dispatch::{EventType, ExtendableEvent, Listeners};
use crate::error::{ExtensionError, panic_message};
use crate::events::Bus;
use crate::scheduler::TaskScheduler;

use super::hot::HotContext;
use super::script::ScriptRef;

/// Services shared by every worker instance of one registration.
#[derive(Clone)]
pub struct WorkerEnv {
    pub(crate) scope: Arc<str>,
    pub(crate) caches: Arc<dyn CacheStorageApi>,
    pub(crate) broadcast: Arc<BroadcastRelay>,
    pub(crate) scheduler: Arc<TaskScheduler>,
    pub(crate) bus: Option<Bus>,
}

impl std::fmt::Debug for WorkerEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerEnv")
            .field("scope", &self.scope)
            .field("broadcast", &self.broadcast.id())
            .finish_non_exhaustive()
    }
}

impl WorkerEnv {
    /// Creates an environment for the registration at `scope`.
    pub fn new(
        scope: impl Into<Arc<str>>,
        caches: Arc<dyn CacheStorageApi>,
        broadcast: Arc<BroadcastRelay>,
        scheduler: Arc<TaskScheduler>,
    ) -> Self {
        Self {
            scope: scope.into(),
            caches,
            broadcast,
            scheduler,
            bus: None,
        }
    }

    /// Publishes lifecycle and dispatch events on `bus`.
    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Registration scope.
    pub fn scope(&self) -> &str {
        &self.scope
    }
}

/// Global scope of one script evaluation.
pub struct WorkerScope {
    env: WorkerEnv,
    listeners: Listeners,
    hot: HotContext,
}

impl WorkerScope {
    pub(crate) fn new(env: WorkerEnv) -> Self {
        Self {
            env,
            listeners: Listeners::new(),
            hot: HotContext::new(),
        }
    }

    /// Registration scope this code runs under.
    pub fn name(&self) -> &str {
        &self.env.scope
    }

    /// Appends a listener for `kind`; listeners run in registration order.
    pub fn add_event_listener<F>(&mut self, kind: EventType, listener: F)
    where
        F: Fn(&ExtendableEvent) -> Result<(), ExtensionError> + Send + Sync + 'static,
    {
        self.listeners.add(kind, listener);
    }

    pub fn on_install<F>(&mut self, listener: F)
    where
        F: Fn(&ExtendableEvent) -> Result<(), ExtensionError> + Send + Sync + 'static,
    {
        self.add_event_listener(EventType::Install, listener);
    }

    pub fn on_activate<F>(&mut self, listener: F)
    where
        F: Fn(&ExtendableEvent) -> Result<(), ExtensionError> + Send + Sync + 'static,
    {
        self.add_event_listener(EventType::Activate, listener);
    }

    pub fn on_fetch<F>(&mut self, listener: F)
    where
        F: Fn(&ExtendableEvent) -> Result<(), ExtensionError> + Send + Sync + 'static,
    {
        self.add_event_listener(EventType::Fetch, listener);
    }

    pub fn on_message<F>(&mut self, listener: F)
    where
        F: Fn(&ExtendableEvent) -> Result<(), ExtensionError> + Send + Sync + 'static,
    {
        self.add_event_listener(EventType::Message, listener);
    }

    /// Cache storage visible to this worker.
    pub fn caches(&self) -> Arc<dyn CacheStorageApi> {
        Arc::clone(&self.env.caches)
    }

    /// Broadcast endpoint of this context.
    pub fn broadcast(&self) -> Arc<BroadcastRelay> {
        Arc::clone(&self.env.broadcast)
    }

    /// Scheduler driving this context.
    pub fn scheduler(&self) -> Arc<TaskScheduler> {
        Arc::clone(&self.env.scheduler)
    }

    /// Hot-reload hooks of this evaluation.
    pub fn hot(&self) -> &HotContext {
        &self.hot
    }

    pub(crate) fn into_parts(self) -> (Listeners, HotContext) {
        (self.listeners, self.hot)
    }
}

/// Evaluates `script` against a fresh scope; a panic counts as a failure.
pub(crate) fn evaluate(script: &ScriptRef, env: &WorkerEnv) -> Result<WorkerScope, ExtensionError> {
    let mut scope = WorkerScope::new(env.clone());
    match std::panic::catch_unwind(AssertUnwindSafe(|| script.evaluate(&mut scope))) {
        Ok(Ok(())) => Ok(scope),
        Ok(Err(e)) => Err(e),
        Err(payload) => Err(ExtensionError::Panicked {
            info: panic_message(&*payload),
        }),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::broadcast::LocalHub;
    use crate::cache::{CacheStorage, MemoryFactory};

    /// In-memory environment for unit tests.
    pub(crate) fn env() -> WorkerEnv {
        WorkerEnv::new(
            "/",
            Arc::new(CacheStorage::new(Arc::new(MemoryFactory))),
            BroadcastRelay::new(LocalHub::new(16)),
            TaskScheduler::new(),
        )
    }
}
