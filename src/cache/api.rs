//! Worker-facing cache interfaces.
//!
//! Worker code sees the same two traits whether the storage lives in its own
//! context ([`CacheStorage`](super::CacheStorage)) or behind a relay
//! ([`RemoteCacheStorage`](super::RemoteCacheStorage)).

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RuntimeError;
use crate::http::{Request, Response};

use super::key::MatchOptions;

/// Shared handle to one named cache.
pub type CacheHandle = Arc<dyn CacheApi>;

/// One named cache of request/response pairs.
#[async_trait]
pub trait CacheApi: Send + Sync + 'static {
    /// Cache name.
    fn name(&self) -> &str;

    /// First stored response answering `request`.
    async fn match_one(
        &self,
        request: &Request,
        opts: MatchOptions,
    ) -> Result<Option<Response>, RuntimeError>;

    /// Every stored response answering `request` (all when `None`).
    async fn match_all(
        &self,
        request: Option<&Request>,
        opts: MatchOptions,
    ) -> Result<Vec<Response>, RuntimeError>;

    /// Fetches `request` and stores the response.
    async fn add(&self, request: Request) -> Result<(), RuntimeError> {
        self.add_all(vec![request]).await
    }

    /// Fetches every request, then stores all responses; nothing is stored if any fetch fails.
    async fn add_all(&self, requests: Vec<Request>) -> Result<(), RuntimeError>;

    /// Stores `response` for `request`.
    ///
    /// # Errors
    /// `Type` for non-GET requests and `206 Partial Content` responses.
    async fn put(&self, request: Request, response: Response) -> Result<(), RuntimeError>;

    /// Removes entries answering `request`; `false` if none matched.
    async fn delete(&self, request: &Request, opts: MatchOptions) -> Result<bool, RuntimeError>;

    /// Requests of stored entries answering `request` (all when `None`).
    async fn keys(
        &self,
        request: Option<&Request>,
        opts: MatchOptions,
    ) -> Result<Vec<Request>, RuntimeError>;
}

/// The set of named caches visible to a worker.
#[async_trait]
pub trait CacheStorageApi: Send + Sync + 'static {
    /// Opens (creating on first use) the cache called `name`.
    ///
    /// Opening the same name twice yields the same cache.
    async fn open(&self, name: &str) -> Result<CacheHandle, RuntimeError>;

    /// True if a cache called `name` exists.
    async fn has(&self, name: &str) -> Result<bool, RuntimeError>;

    /// Disposes and removes `name`; `false` if it did not exist.
    async fn delete(&self, name: &str) -> Result<bool, RuntimeError>;

    /// Cache names in creation order.
    async fn keys(&self) -> Result<Vec<String>, RuntimeError>;

    /// First response answering `request`, searching caches in creation order
    /// (or only `opts.cache_name` when set).
    async fn match_any(
        &self,
        request: &Request,
        opts: MatchOptions,
    ) -> Result<Option<Response>, RuntimeError>;
}

/// Only GET requests can be stored.
pub(crate) fn validate_request(request: &Request) -> Result<(), RuntimeError> {
    if !request.method.eq_ignore_ascii_case("GET") {
        return Err(RuntimeError::type_error(format!(
            "only GET requests can be cached, got {} {}",
            request.method, request.url
        )));
    }
    Ok(())
}

/// Argument checks shared by every `put` implementation.
pub(crate) fn validate_put(request: &Request, response: &Response) -> Result<(), RuntimeError> {
    validate_request(request)?;
    if response.status == 206 {
        return Err(RuntimeError::type_error(format!(
            "partial response (206) for {} cannot be cached",
            request.url
        )));
    }
    Ok(())
}

/// Response check applied by `add`/`add_all` before storing.
pub(crate) fn validate_fetched(request: &Request, response: &Response) -> Result<(), RuntimeError> {
    if !response.is_ok() {
        return Err(RuntimeError::type_error(format!(
            "fetch of {} returned status {}",
            request.url, response.status
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_rejects_non_get_and_partial_responses() {
        let post = Request::new("POST", "https://app.test/a");
        assert_eq!(
            validate_put(&post, &Response::ok("x")).map_err(|e| e.as_label()),
            Err("type_error")
        );
        let get = Request::get("https://app.test/a");
        assert!(validate_put(&get, &Response::new(206, "x")).is_err());
        assert!(validate_put(&get, &Response::new(404, "x")).is_ok());
    }

    #[test]
    fn add_rejects_non_success_statuses() {
        let get = Request::get("https://app.test/a");
        assert!(validate_fetched(&get, &Response::new(500, "")).is_err());
        assert!(validate_fetched(&get, &Response::ok("")).is_ok());
    }
}
