//! # Platform adapters: where requests come from.
//!
//! A [`Platform`] turns a request [`Handler`] into a running [`Server`]. Hosts
//! resolve the adapter by name from a [`NamedRegistry`]; unknown names fail fast
//! with the list of registered ones.
//!
//! The built-in [`Loopback`] platform opens no sockets: requests are handed to
//! [`Server::handle`] directly, which is what tests and embedders use.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::error::RuntimeError;
use crate::http::{Request, Response};

use super::registry::NamedRegistry;

/// Request handler a server calls for every inbound request.
pub type Handler = Arc<dyn Fn(Request) -> BoxFuture<'static, Response> + Send + Sync>;

/// Shared handle to a platform adapter.
pub type PlatformRef = Arc<dyn Platform>;

/// Where a server listens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerOptions {
    pub port: u16,
    pub host: String,
}

/// A running server created by a platform.
#[async_trait]
pub trait Server: Send + Sync + 'static {
    /// Human-readable listen address.
    fn address(&self) -> String;

    /// Serves one request.
    async fn handle(&self, request: Request) -> Response;

    /// Stops accepting requests. Idempotent.
    async fn close(&self);
}

/// Adapter that exposes a handler on some transport.
#[async_trait]
pub trait Platform: Send + Sync + 'static {
    /// Stable platform name used for lookup.
    fn name(&self) -> &'static str;

    /// Creates a server that feeds requests to `handler`.
    async fn create_server(
        &self,
        handler: Handler,
        opts: ServerOptions,
    ) -> Result<Arc<dyn Server>, RuntimeError>;

    /// Called once the host finished starting.
    async fn on_start(&self) -> Result<(), RuntimeError> {
        Ok(())
    }

    /// Called once the host finished draining.
    async fn on_stop(&self) -> Result<(), RuntimeError> {
        Ok(())
    }
}

/// In-process platform without sockets.
#[derive(Debug, Default, Clone, Copy)]
pub struct Loopback;

#[async_trait]
impl Platform for Loopback {
    fn name(&self) -> &'static str {
        "loopback"
    }

    async fn create_server(
        &self,
        handler: Handler,
        opts: ServerOptions,
    ) -> Result<Arc<dyn Server>, RuntimeError> {
        Ok(Arc::new(LoopbackServer {
            handler,
            address: format!("loopback://{}:{}", opts.host, opts.port),
            closed: AtomicBool::new(false),
        }))
    }
}

struct LoopbackServer {
    handler: Handler,
    address: String,
    closed: AtomicBool,
}

impl fmt::Debug for LoopbackServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackServer")
            .field("address", &self.address)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

#[async_trait]
impl Server for LoopbackServer {
    fn address(&self) -> String {
        self.address.clone()
    }

    async fn handle(&self, request: Request) -> Response {
        if self.closed.load(Ordering::SeqCst) {
            return Response::error(503, "server is closed");
        }
        (self.handler)(request).await
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Platform table with the built-in adapters plus `extra` (later names win).
pub fn platform_table(extra: &[PlatformRef]) -> NamedRegistry<PlatformRef> {
    let mut table = NamedRegistry::new("platform");
    table.register("loopback", Arc::new(Loopback) as PlatformRef);
    for p in extra {
        table.register(p.name(), Arc::clone(p));
    }
    table
}
