//! # CacheStorage: the authoritative set of named caches.
//!
//! ## Rules
//! - `open(name)` creates the cache on first use; concurrent opens of the same
//!   name observe one instance (creation happens under the write lock).
//! - `keys()` and `match_any()` follow creation order.
//! - `delete(name)` removes, purges and disposes the cache; `false` if absent.
//!   Disposal runs even when the purge failed; the first error is reported.
//! - `dispose()` disposes every cache exactly once and waits for all of them;
//!   calling it again is a no-op. After disposal every operation fails with
//!   `InvalidState`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::future::join_all;
use indexmap::IndexMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::RuntimeError;
use crate::events::{Bus, RuntimeEvent, RuntimeEventKind};
use crate::http::{Request, Response};

use super::api::{CacheApi, CacheHandle, CacheStorageApi};
use super::backend::{FetchRef, NoNetwork};
use super::factory::FactoryRef;
use super::key::MatchOptions;
use super::local::Cache;

/// Local cache storage; the owner side of the relayed shape.
pub struct CacheStorage {
    caches: RwLock<IndexMap<String, Arc<Cache>>>,
    factory: FactoryRef,
    fetch: FetchRef,
    bus: Option<Bus>,
    disposed: AtomicBool,
}

impl std::fmt::Debug for CacheStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStorage")
            .field("backend", &self.factory.kind())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl CacheStorage {
    /// Storage creating backends through `factory`, with no network.
    pub fn new(factory: FactoryRef) -> Self {
        Self {
            caches: RwLock::new(IndexMap::new()),
            factory,
            fetch: Arc::new(NoNetwork),
            bus: None,
            disposed: AtomicBool::new(false),
        }
    }

    /// Uses `fetch` for `add`/`add_all`.
    pub fn with_fetch(mut self, fetch: FetchRef) -> Self {
        self.fetch = fetch;
        self
    }

    /// Publishes `CacheOpened`/`CacheDeleted` on `bus`.
    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// True once [`dispose`](Self::dispose) ran.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Opens `name` and returns the concrete cache instance.
    pub async fn open_cache(&self, name: &str) -> Result<Arc<Cache>, RuntimeError> {
        self.ensure_live()?;
        if let Some(cache) = self.caches.read().await.get(name) {
            return Ok(Arc::clone(cache));
        }

        let mut caches = self.caches.write().await;
        self.ensure_live()?;
        if let Some(cache) = caches.get(name) {
            return Ok(Arc::clone(cache));
        }
        let backend = self.factory.create(name)?;
        let cache = Arc::new(Cache::new(name, backend, Arc::clone(&self.fetch)));
        caches.insert(name.to_string(), Arc::clone(&cache));
        drop(caches);

        debug!(cache = name, backend = self.factory.kind(), "cache opened");
        self.publish(RuntimeEventKind::CacheOpened, name);
        Ok(cache)
    }

    /// Disposes every cache and waits for all disposals. Idempotent.
    ///
    /// # Errors
    /// The first backend disposal error, after every disposal finished.
    pub async fn dispose(&self) -> Result<(), RuntimeError> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let caches: Vec<Arc<Cache>> = self.caches.write().await.drain(..).map(|(_, c)| c).collect();
        let results = join_all(caches.iter().map(|c| c.dispose())).await;

        let mut first_err = None;
        for (cache, result) in caches.iter().zip(results) {
            if let Err(e) = result {
                warn!(cache = cache.name(), error = %e, "cache disposal failed");
                first_err.get_or_insert(e);
            }
        }
        debug!(caches = caches.len(), "cache storage disposed");
        first_err.map_or(Ok(()), Err)
    }

    fn ensure_live(&self) -> Result<(), RuntimeError> {
        if self.is_disposed() {
            return Err(RuntimeError::invalid_state("cache storage is disposed"));
        }
        Ok(())
    }

    fn publish(&self, kind: RuntimeEventKind, name: &str) {
        if let Some(bus) = &self.bus {
            bus.publish(RuntimeEvent::new(kind).with_cache(name));
        }
    }
}

#[async_trait]
impl CacheStorageApi for CacheStorage {
    async fn open(&self, name: &str) -> Result<CacheHandle, RuntimeError> {
        let cache: CacheHandle = self.open_cache(name).await?;
        Ok(cache)
    }

    async fn has(&self, name: &str) -> Result<bool, RuntimeError> {
        self.ensure_live()?;
        Ok(self.caches.read().await.contains_key(name))
    }

    async fn delete(&self, name: &str) -> Result<bool, RuntimeError> {
        self.ensure_live()?;
        let Some(cache) = self.caches.write().await.shift_remove(name) else {
            return Ok(false);
        };
        let purged = cache.purge().await;
        let disposed = cache.dispose().await;
        debug!(cache = name, "cache deleted");
        self.publish(RuntimeEventKind::CacheDeleted, name);
        purged?;
        disposed?;
        Ok(true)
    }

    async fn keys(&self) -> Result<Vec<String>, RuntimeError> {
        self.ensure_live()?;
        Ok(self.caches.read().await.keys().cloned().collect())
    }

    async fn match_any(
        &self,
        request: &Request,
        opts: MatchOptions,
    ) -> Result<Option<Response>, RuntimeError> {
        self.ensure_live()?;
        let candidates: Vec<Arc<Cache>> = {
            let caches = self.caches.read().await;
            match &opts.cache_name {
                Some(name) => caches.get(name).cloned().into_iter().collect(),
                None => caches.values().cloned().collect(),
            }
        };
        for cache in candidates {
            if let Some(hit) = cache.match_one(request, opts.clone()).await? {
                return Ok(Some(hit));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::cache::{BackendFactory, CacheBackend, MemoryBackend, MemoryFactory};

    fn storage() -> Arc<CacheStorage> {
        Arc::new(CacheStorage::new(Arc::new(MemoryFactory)))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_opens_yield_one_instance() {
        let s = storage();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let s = Arc::clone(&s);
                tokio::spawn(async move { s.open_cache("v1").await })
            })
            .collect();

        let mut opened = Vec::new();
        for h in handles {
            opened.push(h.await.expect("join").expect("open"));
        }
        assert!(opened.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(s.keys().await.expect("keys"), vec!["v1".to_string()]);
    }

    #[tokio::test]
    async fn delete_disposes_and_reports_existence() {
        let s = storage();
        assert!(!s.delete("never").await.expect("delete"));

        let v1 = s.open_cache("v1").await.expect("open");
        assert!(s.delete("v1").await.expect("delete"));
        assert!(v1.is_disposed());
        assert!(!s.has("v1").await.expect("has"));

        let again = s.open_cache("v1").await.expect("reopen");
        assert!(!Arc::ptr_eq(&v1, &again));
    }

    struct FullDisk {
        inner: MemoryBackend,
        disposals: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CacheBackend for FullDisk {
        async fn match_all(
            &self,
            request: Option<&Request>,
            opts: &MatchOptions,
        ) -> Result<Vec<Response>, RuntimeError> {
            self.inner.match_all(request, opts).await
        }

        async fn put(&self, request: Request, response: Response) -> Result<(), RuntimeError> {
            self.inner.put(request, response).await
        }

        async fn delete(&self, request: &Request, opts: &MatchOptions) -> Result<bool, RuntimeError> {
            self.inner.delete(request, opts).await
        }

        async fn keys(
            &self,
            request: Option<&Request>,
            opts: &MatchOptions,
        ) -> Result<Vec<Request>, RuntimeError> {
            self.inner.keys(request, opts).await
        }

        async fn purge(&self) -> Result<(), RuntimeError> {
            Err(RuntimeError::storage("disk full"))
        }

        async fn dispose(&self) -> Result<(), RuntimeError> {
            self.disposals.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FullDiskFactory(Arc<AtomicUsize>);

    impl BackendFactory for FullDiskFactory {
        fn kind(&self) -> &'static str {
            "full-disk"
        }

        fn create(&self, _name: &str) -> Result<Arc<dyn CacheBackend>, RuntimeError> {
            Ok(Arc::new(FullDisk {
                inner: MemoryBackend::new(),
                disposals: Arc::clone(&self.0),
            }))
        }
    }

    #[tokio::test]
    async fn failed_purge_still_disposes_the_deleted_cache() {
        let disposals = Arc::new(AtomicUsize::new(0));
        let s = CacheStorage::new(Arc::new(FullDiskFactory(Arc::clone(&disposals))));
        let v1 = s.open_cache("v1").await.expect("open");

        let err = s.delete("v1").await.expect_err("purge fails");
        assert_eq!(err.as_label(), "storage");
        assert!(err.to_string().contains("disk full"));
        assert_eq!(disposals.load(Ordering::SeqCst), 1);
        assert!(v1.is_disposed());
        assert!(!s.has("v1").await.expect("has"));

        s.dispose().await.expect("dispose storage");
        assert_eq!(disposals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn match_any_searches_in_creation_order() {
        let s = storage();
        let a = s.open("a").await.expect("open a");
        let b = s.open("b").await.expect("open b");
        let req = Request::get("https://app.test/x");
        b.put(req.clone(), Response::ok("from b")).await.expect("put b");
        a.put(req.clone(), Response::ok("from a")).await.expect("put a");

        let hit = s.match_any(&req, MatchOptions::default()).await.expect("match");
        assert_eq!(hit.map(|r| r.text()), Some("from a".to_string()));

        let only_b = MatchOptions {
            cache_name: Some("b".into()),
            ..MatchOptions::default()
        };
        let hit = s.match_any(&req, only_b).await.expect("match b");
        assert_eq!(hit.map(|r| r.text()), Some("from b".to_string()));
        assert_eq!(s.keys().await.expect("keys"), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn dispose_twice_is_not_an_error() {
        let s = storage();
        let v1 = s.open_cache("v1").await.expect("open");
        s.dispose().await.expect("dispose");
        s.dispose().await.expect("dispose again");
        assert!(v1.is_disposed());
        assert_eq!(
            s.open("v2").await.err().map(|e| e.as_label()),
            Some("invalid_state")
        );
    }
}
