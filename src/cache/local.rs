//! Local cache facade over a [`CacheBackend`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::future::try_join_all;

use crate::error::RuntimeError;
use crate::http::{Request, Response};

use super::api::{CacheApi, validate_fetched, validate_put, validate_request};
use super::backend::{CacheBackend, FetchRef};
use super::key::MatchOptions;

/// A named cache owned by a [`CacheStorage`](super::CacheStorage).
///
/// Every operation on a disposed cache fails with `InvalidState`.
pub struct Cache {
    name: String,
    backend: Arc<dyn CacheBackend>,
    fetch: FetchRef,
    disposed: AtomicBool,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.name)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Cache {
    pub(crate) fn new(name: &str, backend: Arc<dyn CacheBackend>, fetch: FetchRef) -> Self {
        Self {
            name: name.to_string(),
            backend,
            fetch,
            disposed: AtomicBool::new(false),
        }
    }

    /// True once the cache was deleted or its storage disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Marks the cache disposed and releases its backend.
    ///
    /// Returns `false` (and does nothing) if it was already disposed.
    pub(crate) async fn dispose(&self) -> Result<bool, RuntimeError> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        self.backend.dispose().await?;
        Ok(true)
    }

    pub(crate) async fn purge(&self) -> Result<(), RuntimeError> {
        self.backend.purge().await
    }

    fn ensure_live(&self) -> Result<(), RuntimeError> {
        if self.is_disposed() {
            return Err(RuntimeError::invalid_state(format!(
                "cache '{}' is disposed",
                self.name
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheApi for Cache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn match_one(
        &self,
        request: &Request,
        opts: MatchOptions,
    ) -> Result<Option<Response>, RuntimeError> {
        self.ensure_live()?;
        self.backend.match_one(request, &opts).await
    }

    async fn match_all(
        &self,
        request: Option<&Request>,
        opts: MatchOptions,
    ) -> Result<Vec<Response>, RuntimeError> {
        self.ensure_live()?;
        self.backend.match_all(request, &opts).await
    }

    async fn add_all(&self, requests: Vec<Request>) -> Result<(), RuntimeError> {
        self.ensure_live()?;
        for request in &requests {
            validate_request(request)?;
        }
        let fetched = try_join_all(requests.into_iter().map(|request| {
            let fetch = Arc::clone(&self.fetch);
            async move {
                let response = fetch.fetch(request.clone()).await?;
                validate_fetched(&request, &response)?;
                Ok::<_, RuntimeError>((request, response))
            }
        }))
        .await?;

        self.ensure_live()?;
        for (request, response) in fetched {
            self.backend.put(request, response).await?;
        }
        Ok(())
    }

    async fn put(&self, request: Request, response: Response) -> Result<(), RuntimeError> {
        self.ensure_live()?;
        validate_put(&request, &response)?;
        self.backend.put(request, response).await
    }

    async fn delete(&self, request: &Request, opts: MatchOptions) -> Result<bool, RuntimeError> {
        self.ensure_live()?;
        self.backend.delete(request, &opts).await
    }

    async fn keys(
        &self,
        request: Option<&Request>,
        opts: MatchOptions,
    ) -> Result<Vec<Request>, RuntimeError> {
        self.ensure_live()?;
        self.backend.keys(request, &opts).await
    }
}
