//! # Pluggable cache storage.
//!
//! [`CacheBackend`] is what a named cache stores its entries in. The
//! [`Cache`](super::Cache) facade validates arguments and enforces the disposed
//! flag; backends only store and query.
//!
//! [`Fetch`] is the network collaborator used by `add`/`add_all`.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RuntimeError;
use crate::http::{Request, Response};

use super::key::MatchOptions;

/// Storage behind one named cache.
#[async_trait]
pub trait CacheBackend: Send + Sync + 'static {
    /// Responses answering `request` (all when `None`), in insertion order.
    async fn match_all(
        &self,
        request: Option<&Request>,
        opts: &MatchOptions,
    ) -> Result<Vec<Response>, RuntimeError>;

    /// First response answering `request`.
    async fn match_one(
        &self,
        request: &Request,
        opts: &MatchOptions,
    ) -> Result<Option<Response>, RuntimeError> {
        Ok(self.match_all(Some(request), opts).await?.into_iter().next())
    }

    /// Stores `response` for `request`, replacing an entry with the same key.
    async fn put(&self, request: Request, response: Response) -> Result<(), RuntimeError>;

    /// Removes entries answering `request`; `true` if any existed.
    async fn delete(&self, request: &Request, opts: &MatchOptions) -> Result<bool, RuntimeError>;

    /// Requests of entries answering `request` (all when `None`).
    async fn keys(
        &self,
        request: Option<&Request>,
        opts: &MatchOptions,
    ) -> Result<Vec<Request>, RuntimeError>;

    /// Drops persisted data when the cache is deleted from its storage.
    async fn purge(&self) -> Result<(), RuntimeError> {
        Ok(())
    }

    /// Releases resources. Called exactly once per backend instance.
    async fn dispose(&self) -> Result<(), RuntimeError> {
        Ok(())
    }
}

/// Performs network requests for `add`/`add_all`.
#[async_trait]
pub trait Fetch: Send + Sync + 'static {
    /// Fetches `request`.
    async fn fetch(&self, request: Request) -> Result<Response, RuntimeError>;
}

/// Shared fetch handle.
pub type FetchRef = Arc<dyn Fetch>;

/// Fetch collaborator for runtimes with no network configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoNetwork;

#[async_trait]
impl Fetch for NoNetwork {
    async fn fetch(&self, request: Request) -> Result<Response, RuntimeError> {
        Err(RuntimeError::type_error(format!(
            "network fetch is not configured (requested {})",
            request.url
        )))
    }
}

/// Closure-backed [`Fetch`].
///
/// ```rust
/// use workervisor::{FetchFn, FetchRef, Request, Response, RuntimeError};
///
/// let fetch: FetchRef = FetchFn::arc(|req: Request| async move {
///     Ok::<_, RuntimeError>(Response::ok(format!("body of {}", req.url)))
/// });
/// ```
pub struct FetchFn<F> {
    f: F,
}

impl<F> FetchFn<F> {
    /// Wraps `f`.
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Wraps `f` and returns it as a shared handle.
    pub fn arc<Fut>(f: F) -> FetchRef
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response, RuntimeError>> + Send + 'static,
    {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut> Fetch for FetchFn<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, RuntimeError>> + Send + 'static,
{
    async fn fetch(&self, request: Request) -> Result<Response, RuntimeError> {
        (self.f)(request).await
    }
}
