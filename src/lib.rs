//! # workervisor
//!
//! **Workervisor** runs event-driven worker code (install/activate lifecycle,
//! fetch dispatch with extendable lifetimes, a response cache, broadcast
//! channels) unchanged across host topologies: one context, or a pool of
//! contexts that share no memory.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!                     ┌──────────────────────────────────────────────┐
//!   Request ─────────►│  Host                                        │
//!                     │  - Bus + SubscriberSet (runtime events)      │
//!                     │  - CacheStorage (+ CacheOwner in a pool)     │
//!                     │  - platform Server (loopback built in)       │
//!                     └──────┬──────────────────┬────────────────────┘
//!                            ▼                  ▼
//!                 ┌────────────────────┐  ┌────────────────────┐
//!                 │ ExecutionContext 0 │  │ ExecutionContext N │
//!                 │  TaskScheduler     │  │  TaskScheduler     │
//!                 │  BroadcastRelay    │  │  BroadcastRelay    │
//!                 │  Registration      │  │  Registration      │
//!                 └─────────┬──────────┘  └─────────┬──────────┘
//!                           ▼                       ▼
//!                  WorkerInstance (active)  WorkerInstance (active)
//!                           │
//!          EventDispatcher: listeners ─► wait_until / respond_with ─► settle
//! ```
//!
//! ### Lifecycle
//! ```text
//! installing ──► installed ──► activating ──► active ──► redundant
//!      └────────────┴───────────────┴─── failure ──────────┘
//! ```
//!
//! ## Features
//! | Area               | Description                                                   | Key types                                      |
//! |--------------------|---------------------------------------------------------------|------------------------------------------------|
//! | **Dispatch**       | Listeners, lifetime extensions, settlement                    | [`EventDispatcher`], [`ExtendableEvent`]       |
//! | **Lifecycle**      | Install/activate/redundant, hot reload                        | [`Registration`], [`HotContext`]               |
//! | **Cache**          | Local and relayed cache storage with pluggable backends       | [`CacheStorage`], [`RemoteCacheStorage`]      |
//! | **Broadcast**      | Named channels that never echo a sender's own messages        | [`BroadcastRelay`]                             |
//! | **Scheduling**     | Microtask / scheduled / timer ordering                        | [`TaskScheduler`]                              |
//! | **Subscriber API** | Observe lifecycle, dispatch and cache events                  | [`Subscribe`], [`RuntimeEvent`]                |
//! | **Errors**         | Typed runtime and extension errors                            | [`RuntimeError`], [`ExtensionError`]           |
//! | **Configuration**  | Centralized settings with an environment overlay              | [`Config`]                                     |
//!
//! ## Optional features
//! - `logging` (default): exports the built-in [`LogWriter`] subscriber.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use workervisor::{
//!     CacheApi, CacheStorageApi, Config, ExtensionError, Host, MatchOptions, Request, Response,
//!     ScriptFn, Topology, WorkerScope,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cfg = Config::default();
//!     cfg.topology = Topology::Pool;
//!     cfg.pool_size = 2;
//!
//!     #[cfg(feature = "logging")]
//!     let subs: Vec<Arc<dyn workervisor::Subscribe>> = vec![Arc::new(workervisor::LogWriter::new())];
//!     #[cfg(not(feature = "logging"))]
//!     let subs: Vec<Arc<dyn workervisor::Subscribe>> = Vec::new();
//!
//!     let host = Host::builder(cfg).with_subscribers(subs).build()?;
//!
//!     let app = ScriptFn::arc("app", |scope: &mut WorkerScope| {
//!         let caches = scope.caches();
//!         scope.on_fetch(move |ev| {
//!             let caches = Arc::clone(&caches);
//!             let Some(request) = ev.request().cloned() else {
//!                 return Ok(());
//!             };
//!             ev.respond_with(async move {
//!                 let cache = caches.open("pages").await?;
//!                 if let Some(hit) = cache.match_one(&request, MatchOptions::default()).await? {
//!                     return Ok(hit);
//!                 }
//!                 let fresh = Response::ok(format!("rendered {}", request.url));
//!                 cache.put(request, fresh.clone()).await?;
//!                 Ok::<_, ExtensionError>(fresh)
//!             })?;
//!             Ok(())
//!         });
//!         Ok::<_, ExtensionError>(())
//!     });
//!
//!     host.start(app).await?;
//!     let first = host.dispatch_request(Request::get("https://app.test/a")).await;
//!     let second = host.dispatch_request(Request::get("https://app.test/a")).await;
//!     assert_eq!(first, second);
//!
//!     host.shutdown().await?;
//!     Ok(())
//! }
//! ```

mod broadcast;
mod cache;
mod core;
mod dispatch;
mod error;
mod events;
mod http;
pub mod logging;
mod registration;
mod scheduler;
mod subscribers;

// ---- Public re-exports ----

pub use broadcast::{BroadcastRelay, BroadcastTransport, Frame, LocalHub, Subscription};
pub use cache::relay::protocol;
pub use cache::{
    BackendFactory, Cache, CacheApi, CacheBackend, CacheEntry, CacheHandle, CacheKey, CacheOwner,
    CacheStorage, CacheStorageApi, FactoryRef, Fetch, FetchFn, FetchRef, FsBackend, FsFactory,
    MatchOptions, MemoryBackend, MemoryFactory, NoNetwork, RelayConnection, RemoteCache,
    RemoteCacheStorage, backend_table, resolve_backend,
};
pub use crate::core::{
    Config, ExecutionContext, Handler, Host, HostBuilder, Loopback, NamedRegistry, Platform,
    PlatformRef, Server, ServerOptions, Topology, platform_table,
};
pub use dispatch::{
    EventData, EventDispatcher, EventType, ExtendableEvent, Listener, Listeners, Outcome,
    Settlement, UnhandledExtension,
};
pub use error::{ConfigError, ExtensionError, RuntimeError};
pub use events::{Bus, RuntimeEvent, RuntimeEventKind};
pub use http::{Headers, Request, Response};
pub use registration::{
    HotContext, Migration, Registration, ScriptFn, ScriptRef, StateObserver, UpdateOutcome,
    UpdatePolicy, WorkerEnv, WorkerInstance, WorkerScope, WorkerScript, WorkerState,
};
pub use scheduler::{Callback, TaskScheduler};
pub use subscribers::{Subscribe, SubscriberSet};

// Built-in subscriber that renders runtime events through `tracing`.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
