use std::sync::Arc;

use crate::broadcast::{BroadcastTransport, LocalHub};
use crate::cache::{
    CacheOwner, CacheStorage, CacheStorageApi, FactoryRef, FetchRef, NoNetwork, RemoteCacheStorage,
    backend_table,
};
use crate::error::RuntimeError;
use crate::events::Bus;
use crate::subscribers::{Subscribe, SubscriberSet};

use super::config::{Config, Topology};
use super::context::ExecutionContext;
use super::host::Host;
use super::platform::{PlatformRef, platform_table};

/// Registration scope every context serves.
const ROOT_SCOPE: &str = "/";

/// Builder for constructing a [`Host`] with optional collaborators.
pub struct HostBuilder {
    cfg: Config,
    subscribers: Vec<Arc<dyn Subscribe>>,
    fetch: FetchRef,
    platforms: Vec<PlatformRef>,
    backends: Vec<FactoryRef>,
    transport: Option<Arc<dyn BroadcastTransport>>,
}

impl HostBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
            fetch: Arc::new(NoNetwork),
            platforms: Vec::new(),
            backends: Vec::new(),
            transport: None,
        }
    }

    /// Sets runtime event subscribers.
    ///
    /// Subscribers receive lifecycle, dispatch and cache events through
    /// dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Network collaborator used by `Cache::add` / `add_all`.
    pub fn with_fetch(mut self, fetch: FetchRef) -> Self {
        self.fetch = fetch;
        self
    }

    /// Extra platform adapters, selectable through `Config::platform`.
    pub fn with_platforms(mut self, platforms: Vec<PlatformRef>) -> Self {
        self.platforms = platforms;
        self
    }

    /// Extra cache backend, selectable through `Config::cache_backend` by its kind.
    pub fn with_backend(mut self, factory: FactoryRef) -> Self {
        self.backends.push(factory);
        self
    }

    /// Broadcast transport shared by the contexts (defaults to a fresh [`LocalHub`]).
    pub fn with_transport(mut self, transport: Arc<dyn BroadcastTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Builds the host.
    ///
    /// Must be called inside a tokio runtime: subscriber workers, the cache
    /// owner and the context schedulers are spawned here.
    ///
    /// # Errors
    /// `NotFound` if `cfg.platform` or `cfg.cache_backend` names nothing registered.
    pub fn build(self) -> Result<Arc<Host>, RuntimeError> {
        let platform = platform_table(&self.platforms).open(&self.cfg.platform)?;

        let mut backends = backend_table(&self.cfg.cache_dir);
        for factory in self.backends {
            backends.register(factory.kind(), factory);
        }
        let factory = backends.open(&self.cfg.cache_backend)?;

        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let subs = SubscriberSet::new(self.subscribers, bus.clone());
        let storage = Arc::new(
            CacheStorage::new(factory)
                .with_fetch(Arc::clone(&self.fetch))
                .with_bus(bus.clone()),
        );
        let transport: Arc<dyn BroadcastTransport> = match self.transport {
            Some(transport) => transport,
            None => LocalHub::new(self.cfg.broadcast_capacity),
        };
        let runtime_token = tokio_util::sync::CancellationToken::new();

        let (contexts, owner) = match self.cfg.topology {
            Topology::Single => {
                let caches: Arc<dyn CacheStorageApi> = storage.clone();
                let ctx = ExecutionContext::spawn(
                    "ctx-0",
                    ROOT_SCOPE,
                    caches,
                    Arc::clone(&transport),
                    bus.clone(),
                    &runtime_token,
                );
                (vec![ctx], None)
            }
            Topology::Pool => {
                let owner = CacheOwner::spawn(Arc::clone(&storage), self.cfg.relay_capacity);
                let contexts = (0..self.cfg.context_count())
                    .map(|i| {
                        let caches: Arc<dyn CacheStorageApi> = Arc::new(RemoteCacheStorage::new(
                            owner.connect(self.cfg.relay_capacity),
                            Arc::clone(&self.fetch),
                            self.cfg.relay_deadline(),
                        ));
                        ExecutionContext::spawn(
                            format!("ctx-{i}"),
                            ROOT_SCOPE,
                            caches,
                            Arc::clone(&transport),
                            bus.clone(),
                            &runtime_token,
                        )
                    })
                    .collect();
                (contexts, Some(owner))
            }
        };

        Ok(Arc::new(Host::new_internal(
            self.cfg, bus, subs, contexts, storage, owner, platform,
        )))
    }
}
