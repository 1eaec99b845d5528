//! Persistent cache backend: one JSON file per cache.
//!
//! The file is read on first access and rewritten (temp file + rename) after
//! every mutation. Cache names are hex-escaped into file names so any name is
//! representable.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::RuntimeError;
use crate::http::{Request, Response};

use super::backend::CacheBackend;
use super::key::{self, CacheEntry, MatchOptions};

/// Cache entries persisted under `<dir>/<escaped name>.json`.
#[derive(Debug)]
pub struct FsBackend {
    path: PathBuf,
    entries: Mutex<Option<Vec<CacheEntry>>>,
}

impl FsBackend {
    /// Backend for cache `name` stored under `dir`.
    pub fn new(dir: &Path, name: &str) -> Self {
        Self {
            path: dir.join(format!("{}.json", escape(name))),
            entries: Mutex::new(None),
        }
    }

    /// File this backend persists to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Vec<CacheEntry>, RuntimeError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(RuntimeError::storage),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(RuntimeError::storage(e)),
        }
    }

    async fn persist(&self, entries: &[CacheEntry]) -> Result<(), RuntimeError> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(RuntimeError::storage)?;
        }
        let bytes = serde_json::to_vec(entries).map_err(RuntimeError::storage)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(RuntimeError::storage)?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(RuntimeError::storage)?;
        debug!(path = %self.path.display(), entries = entries.len(), "cache persisted");
        Ok(())
    }

    /// Runs `f` on the loaded entries; persists afterwards when `f` reports a change.
    async fn with_entries<T>(
        &self,
        f: impl FnOnce(&mut Vec<CacheEntry>) -> (T, bool),
    ) -> Result<T, RuntimeError> {
        let mut guard = self.entries.lock().await;
        if guard.is_none() {
            *guard = Some(self.load().await?);
        }
        let Some(entries) = guard.as_mut() else {
            return Err(RuntimeError::storage("cache entries unavailable"));
        };
        let (out, changed) = f(entries);
        if changed {
            self.persist(entries).await?;
        }
        Ok(out)
    }
}

fn escape(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for b in name.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02x}"));
        }
    }
    out
}

#[async_trait]
impl CacheBackend for FsBackend {
    async fn match_all(
        &self,
        request: Option<&Request>,
        opts: &MatchOptions,
    ) -> Result<Vec<Response>, RuntimeError> {
        self.with_entries(|entries| {
            let found = key::select(entries, request, opts)
                .map(|e| e.response.clone())
                .collect();
            (found, false)
        })
        .await
    }

    async fn put(&self, request: Request, response: Response) -> Result<(), RuntimeError> {
        self.with_entries(|entries| {
            key::upsert(entries, CacheEntry { request, response });
            ((), true)
        })
        .await
    }

    async fn delete(&self, request: &Request, opts: &MatchOptions) -> Result<bool, RuntimeError> {
        self.with_entries(|entries| {
            let removed = key::remove(entries, request, opts);
            (removed, removed)
        })
        .await
    }

    async fn keys(
        &self,
        request: Option<&Request>,
        opts: &MatchOptions,
    ) -> Result<Vec<Request>, RuntimeError> {
        self.with_entries(|entries| {
            let found = key::select(entries, request, opts)
                .map(|e| e.request.clone())
                .collect();
            (found, false)
        })
        .await
    }

    async fn purge(&self) -> Result<(), RuntimeError> {
        let mut guard = self.entries.lock().await;
        *guard = Some(Vec::new());
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RuntimeError::storage(e)),
        }
    }
}
