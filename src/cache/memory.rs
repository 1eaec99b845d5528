//! In-process cache backend.

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::RuntimeError;
use crate::http::{Request, Response};

use super::backend::CacheBackend;
use super::key::{self, CacheEntry, MatchOptions};

/// Entries kept in a `Vec` in insertion order.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<Vec<CacheEntry>>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn match_all(
        &self,
        request: Option<&Request>,
        opts: &MatchOptions,
    ) -> Result<Vec<Response>, RuntimeError> {
        let entries = self.entries.read();
        Ok(key::select(&entries, request, opts)
            .map(|e| e.response.clone())
            .collect())
    }

    async fn put(&self, request: Request, response: Response) -> Result<(), RuntimeError> {
        key::upsert(&mut self.entries.write(), CacheEntry { request, response });
        Ok(())
    }

    async fn delete(&self, request: &Request, opts: &MatchOptions) -> Result<bool, RuntimeError> {
        Ok(key::remove(&mut self.entries.write(), request, opts))
    }

    async fn keys(
        &self,
        request: Option<&Request>,
        opts: &MatchOptions,
    ) -> Result<Vec<Request>, RuntimeError> {
        let entries = self.entries.read();
        Ok(key::select(&entries, request, opts)
            .map(|e| e.request.clone())
            .collect())
    }

    async fn purge(&self) -> Result<(), RuntimeError> {
        self.entries.write().clear();
        Ok(())
    }
}
