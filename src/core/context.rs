//! One execution context: its own scheduler, broadcast endpoint and registration.
//!
//! Contexts of a pool share nothing but the broadcast transport (which carries
//! bytes) and their cache connection; each could live in its own process.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::broadcast::{BroadcastRelay, BroadcastTransport};
use crate::cache::CacheStorageApi;
use crate::events::Bus;
use crate::registration::{Registration, WorkerEnv};
use crate::scheduler::TaskScheduler;

/// A worker context owned by a [`Host`](crate::Host).
pub struct ExecutionContext {
    name: Arc<str>,
    registration: Arc<Registration>,
    scheduler: Arc<TaskScheduler>,
    broadcast: Arc<BroadcastRelay>,
    caches: Arc<dyn CacheStorageApi>,
    token: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("name", &self.name)
            .field("registration", &self.registration)
            .field("broadcast", &self.broadcast.id())
            .finish()
    }
}

impl ExecutionContext {
    /// Builds the context and starts its scheduler driver under `parent`.
    pub(crate) fn spawn(
        name: impl Into<Arc<str>>,
        scope: &str,
        caches: Arc<dyn CacheStorageApi>,
        transport: Arc<dyn BroadcastTransport>,
        bus: Bus,
        parent: &CancellationToken,
    ) -> Self {
        let scheduler = TaskScheduler::new();
        let broadcast = BroadcastRelay::new(transport);
        let env = WorkerEnv::new(
            scope,
            Arc::clone(&caches),
            Arc::clone(&broadcast),
            Arc::clone(&scheduler),
        )
        .with_bus(bus);

        let token = parent.child_token();
        let driver = scheduler.start(token.clone());
        Self {
            name: name.into(),
            registration: Arc::new(Registration::new(env)),
            scheduler,
            broadcast,
            caches,
            token,
            driver: Mutex::new(Some(driver)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registration(&self) -> &Arc<Registration> {
        &self.registration
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    pub fn broadcast(&self) -> &Arc<BroadcastRelay> {
        &self.broadcast
    }

    /// Cache storage as seen from this context (local or relayed).
    pub fn caches(&self) -> &Arc<dyn CacheStorageApi> {
        &self.caches
    }

    /// Stops the context without waiting: retirement continues on a detached
    /// task and the scheduler driver is cancelled but not joined.
    pub(crate) fn abandon(&self) {
        let registration = Arc::clone(&self.registration);
        tokio::spawn(async move {
            registration.unregister().await;
        });
        self.broadcast.close();
        self.token.cancel();
        drop(self.driver.lock().take());
        debug!(context = %self.name, "context abandoned");
    }

    /// Retires the registration, releases broadcast subscriptions, stops the scheduler.
    pub(crate) async fn drain(&self) {
        let retired = self.registration.unregister().await;
        self.broadcast.close();
        self.token.cancel();

        let driver = self.driver.lock().take();
        if let Some(driver) = driver {
            let _ = driver.await;
        }
        debug!(context = %self.name, retired, "context drained");
    }
}
