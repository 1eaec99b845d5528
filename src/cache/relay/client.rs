//! # Relay client: cache proxies for contexts that do not own the storage.
//!
//! ```text
//! RemoteCache::put ─► Link::call(op)
//!                       ├─ id = next_id++ ; pending[id] = oneshot
//!                       ├─ to_owner.send({type, requestId: id, ...})
//!                       └─ await oneshot (optionally bounded by relay_timeout)
//!
//! reader task:  reply frame ─► pending.remove(requestId) ─► oneshot
//!               owner gone   ─► mark closed, fail every pending call
//! ```
//!
//! All calls from one client share one ordered connection, so the owner sees
//! them in program order.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::cache::api::{validate_fetched, validate_put, validate_request};
use crate::cache::{CacheApi, CacheHandle, CacheStorageApi, FetchRef, MatchOptions};
use crate::error::RuntimeError;
use crate::http::{Request, Response};

use super::owner::{Inbound, RelayConnection};
use super::protocol::{CacheOp, RequestFrame, ResponseFrame};

type Reply = Result<Value, RuntimeError>;
type Pending = Mutex<HashMap<u64, oneshot::Sender<Reply>>>;

struct Link {
    to_owner: mpsc::Sender<Inbound>,
    reply_to: mpsc::Sender<String>,
    pending: Arc<Pending>,
    closed: Arc<AtomicBool>,
    next_id: AtomicU64,
    timeout: Option<Duration>,
}

impl Link {
    fn spawn(conn: RelayConnection, timeout: Option<Duration>) -> Self {
        let RelayConnection {
            to_owner,
            reply_to,
            mut from_owner,
        } = conn;
        let pending: Arc<Pending> = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let watch = to_owner.clone();
        let table = Arc::clone(&pending);
        let flag = Arc::clone(&closed);
        tokio::spawn(async move {
            loop {
                let text = tokio::select! {
                    biased;
                    text = from_owner.recv() => text,
                    _ = watch.closed() => None,
                };
                let Some(text) = text else {
                    break;
                };
                let (request_id, reply) = match serde_json::from_str::<ResponseFrame>(&text) {
                    Ok(ResponseFrame::Response { request_id, result }) => (request_id, Ok(result)),
                    Ok(ResponseFrame::Error { request_id, error }) => {
                        (request_id, Err(RuntimeError::Remote { message: error }))
                    }
                    Err(e) => {
                        warn!(error = %e, "malformed cache relay reply dropped");
                        continue;
                    }
                };
                match table.lock().remove(&request_id) {
                    Some(tx) => {
                        let _ = tx.send(reply);
                    }
                    None => debug!(request_id, "reply for an abandoned cache relay call"),
                }
            }
            flag.store(true, Ordering::SeqCst);
            let abandoned = table.lock().drain().count();
            if abandoned > 0 {
                warn!(abandoned, "cache relay connection closed with calls in flight");
            }
        });

        Self {
            to_owner,
            reply_to,
            pending,
            closed,
            next_id: AtomicU64::new(1),
            timeout,
        }
    }

    async fn call(&self, op: CacheOp) -> Reply {
        let closed_err = || RuntimeError::transport("cache relay connection closed");
        if self.closed.load(Ordering::SeqCst) {
            return Err(closed_err());
        }

        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let tag = op.tag();
        let frame = serde_json::to_string(&RequestFrame { request_id, op })
            .map_err(|e| RuntimeError::transport(format!("{tag} not serializable: {e}")))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id, tx);
        if self.closed.load(Ordering::SeqCst) {
            self.pending.lock().remove(&request_id);
            return Err(closed_err());
        }

        let sent = self
            .to_owner
            .send(Inbound {
                frame,
                reply: self.reply_to.clone(),
            })
            .await;
        if sent.is_err() {
            self.pending.lock().remove(&request_id);
            return Err(closed_err());
        }

        let outcome = match self.timeout {
            None => rx.await,
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.pending.lock().remove(&request_id);
                    return Err(RuntimeError::transport(format!(
                        "{tag} (request {request_id}) timed out after {limit:?}"
                    )));
                }
            },
        };
        outcome.unwrap_or_else(|_| Err(closed_err()))
    }

    async fn call_as<T: DeserializeOwned>(&self, op: CacheOp) -> Result<T, RuntimeError> {
        let tag = op.tag();
        let value = self.call(op).await?;
        serde_json::from_value(value)
            .map_err(|e| RuntimeError::transport(format!("unexpected {tag} result: {e}")))
    }
}

/// [`CacheStorageApi`] backed by a [`CacheOwner`](super::CacheOwner) connection.
pub struct RemoteCacheStorage {
    link: Arc<Link>,
    proxies: Mutex<HashMap<String, Arc<RemoteCache>>>,
    fetch: FetchRef,
}

impl std::fmt::Debug for RemoteCacheStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCacheStorage")
            .field("closed", &self.is_closed())
            .field("timeout", &self.link.timeout)
            .finish()
    }
}

impl RemoteCacheStorage {
    /// Wraps `conn`; `timeout` bounds each call (`None` = wait forever).
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(conn: RelayConnection, fetch: FetchRef, timeout: Option<Duration>) -> Self {
        Self {
            link: Arc::new(Link::spawn(conn, timeout)),
            proxies: Mutex::new(HashMap::new()),
            fetch,
        }
    }

    /// True once the owner side of the connection went away.
    pub fn is_closed(&self) -> bool {
        self.link.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheStorageApi for RemoteCacheStorage {
    async fn open(&self, name: &str) -> Result<CacheHandle, RuntimeError> {
        let cache_id: u64 = self
            .link
            .call_as(CacheOp::Open {
                cache_name: name.to_string(),
            })
            .await?;

        let mut proxies = self.proxies.lock();
        if let Some(existing) = proxies.get(name).filter(|p| p.cache_id == cache_id) {
            let handle: CacheHandle = existing.clone();
            return Ok(handle);
        }
        let proxy = Arc::new(RemoteCache {
            name: name.to_string(),
            cache_id,
            link: Arc::clone(&self.link),
            fetch: Arc::clone(&self.fetch),
        });
        proxies.insert(name.to_string(), Arc::clone(&proxy));
        Ok(proxy)
    }

    async fn has(&self, name: &str) -> Result<bool, RuntimeError> {
        self.link
            .call_as(CacheOp::StorageHas {
                cache_name: name.to_string(),
            })
            .await
    }

    async fn delete(&self, name: &str) -> Result<bool, RuntimeError> {
        let existed = self
            .link
            .call_as(CacheOp::StorageDelete {
                cache_name: name.to_string(),
            })
            .await?;
        self.proxies.lock().remove(name);
        Ok(existed)
    }

    async fn keys(&self) -> Result<Vec<String>, RuntimeError> {
        self.link.call_as(CacheOp::StorageKeys {}).await
    }

    async fn match_any(
        &self,
        request: &Request,
        opts: MatchOptions,
    ) -> Result<Option<Response>, RuntimeError> {
        self.link
            .call_as(CacheOp::StorageMatch {
                request: request.clone(),
                options: opts,
            })
            .await
    }
}

/// Proxy for one cache held by the owner.
pub struct RemoteCache {
    name: String,
    cache_id: u64,
    link: Arc<Link>,
    fetch: FetchRef,
}

impl RemoteCache {
    /// Owner-assigned id of the cache instance this proxy points at.
    pub fn cache_id(&self) -> u64 {
        self.cache_id
    }
}

#[async_trait]
impl CacheApi for RemoteCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn match_one(
        &self,
        request: &Request,
        opts: MatchOptions,
    ) -> Result<Option<Response>, RuntimeError> {
        self.link
            .call_as(CacheOp::Match {
                cache_id: self.cache_id,
                request: request.clone(),
                options: opts,
            })
            .await
    }

    async fn match_all(
        &self,
        request: Option<&Request>,
        opts: MatchOptions,
    ) -> Result<Vec<Response>, RuntimeError> {
        self.link
            .call_as(CacheOp::MatchAll {
                cache_id: self.cache_id,
                request: request.cloned(),
                options: opts,
            })
            .await
    }

    async fn add_all(&self, requests: Vec<Request>) -> Result<(), RuntimeError> {
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
        for (request, response) in fetched {
            self.put(request, response).await?;
        }
        Ok(())
    }

    async fn put(&self, request: Request, response: Response) -> Result<(), RuntimeError> {
        validate_put(&request, &response)?;
        self.link
            .call_as(CacheOp::Put {
                cache_id: self.cache_id,
                request,
                response,
            })
            .await
    }

    async fn delete(&self, request: &Request, opts: MatchOptions) -> Result<bool, RuntimeError> {
        self.link
            .call_as(CacheOp::Delete {
                cache_id: self.cache_id,
                request: request.clone(),
                options: opts,
            })
            .await
    }

    async fn keys(
        &self,
        request: Option<&Request>,
        opts: MatchOptions,
    ) -> Result<Vec<Request>, RuntimeError> {
        self.link
            .call_as(CacheOp::Keys {
                cache_id: self.cache_id,
                request: request.cloned(),
                options: opts,
            })
            .await
    }
}
