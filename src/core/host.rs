//! # Host: wires contexts, caches and the platform server, and drains them on shutdown.
//!
//! The [`Host`] owns the runtime event bus, the [`SubscriberSet`], the
//! authoritative [`CacheStorage`] and one [`ExecutionContext`] per worker slot
//! of the configured [`Topology`](super::Topology).
//!
//! ## High-level architecture
//! ```text
//! single:                                 pool (N contexts, no shared memory):
//!   ctx-0 ──► CacheStorage                  ctx-0 ──► RemoteCacheStorage ──┐
//!                                           ctx-1 ──► RemoteCacheStorage ──┼──► CacheOwner ──► CacheStorage
//!                                           ...                            │
//!                                           ctx-N ──► RemoteCacheStorage ──┘
//!
//! every context: TaskScheduler + BroadcastRelay (shared LocalHub) + Registration
//!
//! Requests:
//!   platform server ──► handler ──► dispatch_request(request)
//!                                     ├─ round-robin over contexts with an active worker
//!                                     ├─ none active        ─► 503
//!                                     └─ settlement         ─► response, or 500 if none assigned
//!
//! Event flow:
//!   Registration / Dispatcher / CacheStorage ── publish ──► Bus ──► listener ──► SubscriberSet::emit
//!
//! Shutdown path:
//!   run(): shutdown::wait_for_shutdown_signal() ─► shutdown()
//!   shutdown():
//!     ├─ Bus.publish(ShutdownRequested); server.close()
//!     ├─ within cfg.grace:
//!     │     ├─ every context: unregister (drains in-flight events) ─► close relay ─► stop scheduler
//!     │     └─ cache owner stop ─► CacheStorage::dispose (waits for every cache disposal)
//!     ├─ Ok      ─► Bus.publish(AllStoppedWithin)
//!     └─ timeout ─► Bus.publish(GraceExceeded) ─► Err(GraceExceeded { stuck })
//! ```
//!
//! ## Example
//! ```rust
//! use workervisor::{Config, ExtensionError, HostBuilder, Request, Response, ScriptFn, WorkerScope};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let host = HostBuilder::new(Config::default()).build()?;
//!
//!     let app = ScriptFn::arc("app", |scope: &mut WorkerScope| {
//!         scope.on_fetch(|ev| {
//!             ev.respond(Response::ok("hello"))?;
//!             Ok(())
//!         });
//!         Ok::<_, ExtensionError>(())
//!     });
//!     host.start(app).await?;
//!
//!     let resp = host.dispatch_request(Request::get("https://app.test/")).await;
//!     assert_eq!(resp.text(), "hello");
//!
//!     host.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use futures::FutureExt;
use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{CacheOwner, CacheStorage};
use crate::error::RuntimeError;
use crate::events::{Bus, RuntimeEvent, RuntimeEventKind};
use crate::http::{Request, Response};
use crate::registration::{ScriptRef, UpdateOutcome};
use crate::subscribers::SubscriberSet;

use super::builder::HostBuilder;
use super::config::Config;
use super::context::ExecutionContext;
use super::platform::{Handler, PlatformRef, Server, ServerOptions};
use super::shutdown;

/// Coordinates worker contexts, event delivery and graceful shutdown.
pub struct Host {
    cfg: Config,
    bus: Bus,
    contexts: Vec<ExecutionContext>,
    storage: Arc<CacheStorage>,
    owner: Option<CacheOwner>,
    platform: PlatformRef,
    server: Mutex<Option<Arc<dyn Server>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    events_token: CancellationToken,
    next: AtomicUsize,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("topology", &self.cfg.topology)
            .field("contexts", &self.contexts.len())
            .field("platform", &self.platform.name())
            .field("started", &self.started.load(Ordering::SeqCst))
            .field("stopped", &self.stopped.load(Ordering::SeqCst))
            .finish()
    }
}

impl Host {
    /// Shorthand for [`HostBuilder::new`].
    pub fn builder(cfg: Config) -> HostBuilder {
        HostBuilder::new(cfg)
    }

    pub(crate) fn new_internal(
        cfg: Config,
        bus: Bus,
        subs: SubscriberSet,
        contexts: Vec<ExecutionContext>,
        storage: Arc<CacheStorage>,
        owner: Option<CacheOwner>,
        platform: PlatformRef,
    ) -> Self {
        let events_token = CancellationToken::new();
        let listener = subscriber_listener(&bus, subs, events_token.clone());
        Self {
            cfg,
            bus,
            contexts,
            storage,
            owner,
            platform,
            server: Mutex::new(None),
            listener: Mutex::new(Some(listener)),
            events_token,
            next: AtomicUsize::new(0),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Configuration the host was built with.
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Runtime event bus.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Execution contexts, one per pool slot (a single one otherwise).
    pub fn contexts(&self) -> &[ExecutionContext] {
        &self.contexts
    }

    /// The authoritative cache storage (what the cache owner serves in a pool).
    pub fn storage(&self) -> &Arc<CacheStorage> {
        &self.storage
    }

    /// Server created by the platform on [`start`](Self::start).
    pub fn server(&self) -> Option<Arc<dyn Server>> {
        self.server.lock().clone()
    }

    /// Installs and activates `script` in every context, then starts the platform server.
    ///
    /// # Errors
    /// - `InvalidState` if the host was already started or stopped.
    /// - `Lifecycle` if install or activate failed in any context.
    /// - whatever the platform returns from `create_server` / `on_start`.
    pub async fn start(self: &Arc<Self>, script: ScriptRef) -> Result<(), RuntimeError> {
        if self.stopped.load(Ordering::SeqCst) || self.started.swap(true, Ordering::SeqCst) {
            return Err(RuntimeError::invalid_state("host can only be started once"));
        }

        join_all(self.contexts.iter().map(|ctx| {
            let script = Arc::clone(&script);
            async move {
                ctx.registration().install(script).await?;
                ctx.registration().activate().await
            }
        }))
        .await
        .into_iter()
        .collect::<Result<Vec<_>, RuntimeError>>()?;

        let weak: Weak<Self> = Arc::downgrade(self);
        let handler: Handler = Arc::new(move |request: Request| {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(host) => host.dispatch_request(request).await,
                    None => Response::error(503, "host is gone"),
                }
            }
            .boxed()
        });
        let opts = ServerOptions {
            port: self.cfg.port,
            host: self.cfg.host.clone(),
        };
        let server = self.platform.create_server(handler, opts).await?;
        let address = server.address();
        *self.server.lock() = Some(server);
        self.platform.on_start().await?;

        info!(
            topology = %self.cfg.topology,
            contexts = self.contexts.len(),
            platform = self.platform.name(),
            %address,
            script = script.name(),
            "host started"
        );
        Ok(())
    }

    /// Delivers new code to every context and activates it where it was not adopted in place.
    ///
    /// # Errors
    /// The first lifecycle failure; contexts where it failed keep their active worker.
    /// Every context runs its step to completion before the error is returned.
    pub async fn update(&self, script: ScriptRef) -> Result<Vec<UpdateOutcome>, RuntimeError> {
        join_all(self.contexts.iter().map(|ctx| {
            let script = Arc::clone(&script);
            async move {
                let outcome = ctx.registration().update(script).await?;
                if matches!(outcome, UpdateOutcome::Installed { .. }) {
                    ctx.registration().activate().await?;
                }
                Ok::<_, RuntimeError>(outcome)
            }
        }))
        .await
        .into_iter()
        .collect()
    }

    /// HTTP boundary: serves `request` on the next context with an active worker.
    ///
    /// Never fails: `503` when no worker is active, `500` when the settled
    /// fetch event carries no response.
    pub async fn dispatch_request(&self, request: Request) -> Response {
        let Some(ctx) = self.pick_context() else {
            return Response::error(503, "no active worker");
        };
        match ctx.registration().dispatch_fetch(request).await {
            Ok(settlement) => {
                if settlement.failed() {
                    debug!(context = ctx.name(), failures = %settlement.failure_summary(), "fetch settled with failures");
                }
                settlement.into_response()
            }
            Err(e) => {
                debug!(context = ctx.name(), error = %e, "fetch not dispatched");
                Response::error(503, "no active worker")
            }
        }
    }

    /// Posts `data` as a message event to every active worker.
    ///
    /// Returns the number of workers that received it.
    pub async fn post_message(&self, data: Value) -> usize {
        let delivered = join_all(self.contexts.iter().map(|ctx| {
            let data = data.clone();
            async move { ctx.registration().post_message(data).await.is_ok() }
        }))
        .await;
        delivered.into_iter().filter(|ok| *ok).count()
    }

    /// Starts with `script`, waits for a termination signal, then shuts down.
    pub async fn run(self: &Arc<Self>, script: ScriptRef) -> Result<(), RuntimeError> {
        self.start(script).await?;
        match shutdown::wait_for_shutdown_signal().await {
            Ok(signal) => info!(signal, "termination signal received"),
            Err(e) => warn!(error = %e, "signal handlers unavailable; shutting down"),
        }
        self.shutdown().await
    }

    /// Drains every context and the cache storage within [`Config::grace`]. Idempotent.
    ///
    /// # Errors
    /// - `GraceExceeded` with the parts that did not drain in time.
    /// - the storage disposal error, if one cache failed to dispose.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.bus.publish(RuntimeEvent::new(RuntimeEventKind::ShutdownRequested));

        let server = self.server.lock().take();
        if let Some(server) = server {
            server.close().await;
        }

        let result = self.drain_with_grace().await;
        if let Err(e) = self.platform.on_stop().await {
            warn!(platform = self.platform.name(), error = %e, "platform on_stop failed");
        }

        self.events_token.cancel();
        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            let _ = listener.await;
        }
        result
    }

    fn pick_context(&self) -> Option<&ExecutionContext> {
        let n = self.contexts.len();
        if n == 0 {
            return None;
        }
        let start = self.next.fetch_add(1, Ordering::Relaxed);
        (0..n)
            .map(|i| &self.contexts[(start + i) % n])
            .find(|ctx| ctx.registration().active().is_some())
    }

    async fn drain_with_grace(&self) -> Result<(), RuntimeError> {
        let grace = self.cfg.grace;
        if grace.is_zero() {
            self.contexts.iter().for_each(ExecutionContext::abandon);
            if let Some(owner) = &self.owner {
                owner.shutdown().await;
            }
            let disposed = self.storage.dispose().await;
            info!(contexts = self.contexts.len(), "host stopped without draining");
            return disposed;
        }
        let pending: Arc<Mutex<BTreeSet<String>>> = Arc::new(Mutex::new(
            self.contexts
                .iter()
                .map(|c| c.name().to_string())
                .chain(std::iter::once("cache-storage".to_string()))
                .collect(),
        ));

        let track = Arc::clone(&pending);
        let drain = async move {
            join_all(self.contexts.iter().map(|ctx| {
                let track = Arc::clone(&track);
                async move {
                    ctx.drain().await;
                    track.lock().remove(ctx.name());
                }
            }))
            .await;

            if let Some(owner) = &self.owner {
                owner.shutdown().await;
            }
            let disposed = self.storage.dispose().await;
            track.lock().remove("cache-storage");
            disposed
        };

        match tokio::time::timeout(grace, drain).await {
            Ok(disposed) => {
                self.bus.publish(RuntimeEvent::new(RuntimeEventKind::AllStoppedWithin));
                info!(?grace, "host drained");
                disposed
            }
            Err(_) => {
                let stuck: Vec<String> = pending.lock().iter().cloned().collect();
                self.bus.publish(
                    RuntimeEvent::new(RuntimeEventKind::GraceExceeded).with_reason(stuck.join(",")),
                );
                warn!(?grace, ?stuck, "shutdown grace exceeded");
                Err(RuntimeError::GraceExceeded { grace, stuck })
            }
        }
    }
}

/// Forwards bus events to the subscriber set until `stop`, then flushes and shuts it down.
fn subscriber_listener(bus: &Bus, set: SubscriberSet, stop: CancellationToken) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                ev = rx.recv() => match ev {
                    Ok(ev) => set.emit(&ev),
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "runtime event listener lagged"),
                    Err(RecvError::Closed) => break,
                },
                _ = stop.cancelled() => {
                    while let Ok(ev) = rx.try_recv() {
                        set.emit(&ev);
                    }
                    break;
                }
            }
        }
        set.shutdown().await;
    })
}
