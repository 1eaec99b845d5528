//! # CacheOwner: the single task that serializes every relayed cache call.
//!
//! ```text
//! client A ──┐  Inbound { frame, reply }
//! client B ──┼──────────────► [mpsc] ──► owner task ──► CacheStorage
//! client C ──┘                              │ one request at a time
//!                                           └──► reply ──► client's reader
//! ```
//!
//! Frames from one client are handled in send order, and a request is fully
//! applied before the next one starts. Cache instances are handed to clients as
//! numeric ids. Deleting a cache drops its instance and leaves a name-only
//! tombstone, so a stale proxy still gets the disposed cache's error message.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{Cache, CacheApi, CacheStorage, CacheStorageApi};
use crate::error::RuntimeError;

use super::protocol::{CacheOp, RequestFrame, ResponseFrame};

/// One frame on its way to the owner, with where to send the answer.
#[derive(Debug)]
pub(crate) struct Inbound {
    pub(crate) frame: String,
    pub(crate) reply: mpsc::Sender<String>,
}

/// Client end of an ordered connection to a [`CacheOwner`].
#[derive(Debug)]
pub struct RelayConnection {
    pub(crate) to_owner: mpsc::Sender<Inbound>,
    pub(crate) reply_to: mpsc::Sender<String>,
    pub(crate) from_owner: mpsc::Receiver<String>,
}

/// Handle to the owner task.
pub struct CacheOwner {
    tx: mpsc::Sender<Inbound>,
    token: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CacheOwner {
    /// Spawns the owner task over `storage`; `capacity` bounds its inbox.
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn(storage: Arc<CacheStorage>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Inbound>(capacity.max(1));
        let token = CancellationToken::new();
        let stop = token.clone();

        let handle = tokio::spawn(async move {
            let mut state = OwnerState::new(storage);
            loop {
                let msg = tokio::select! {
                    _ = stop.cancelled() => break,
                    msg = rx.recv() => msg,
                };
                let Some(Inbound { frame, reply }) = msg else {
                    break;
                };
                if let Some(out) = state.handle(&frame).await {
                    if reply.send(out).await.is_err() {
                        debug!("cache relay caller went away before its reply");
                    }
                }
            }
            debug!("cache owner stopped");
        });

        Self {
            tx,
            token,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Opens a new ordered connection; `capacity` bounds its reply queue.
    pub fn connect(&self, capacity: usize) -> RelayConnection {
        let (reply_to, from_owner) = mpsc::channel(capacity.max(1));
        RelayConnection {
            to_owner: self.tx.clone(),
            reply_to,
            from_owner,
        }
    }

    /// Stops the owner task and waits for it. Idempotent.
    ///
    /// Pending client calls fail with `RelayTransport`.
    pub async fn shutdown(&self) {
        self.token.cancel();
        let handle = self.handle.lock().take();
        if let Some(h) = handle {
            let _ = h.await;
        }
    }
}

struct OwnerState {
    storage: Arc<CacheStorage>,
    live: HashMap<u64, Arc<Cache>>,
    names: HashMap<String, u64>,
    /// Ids of deleted caches, by name.
    retired: HashMap<u64, String>,
    next_id: u64,
}

impl OwnerState {
    fn new(storage: Arc<CacheStorage>) -> Self {
        Self {
            storage,
            live: HashMap::new(),
            names: HashMap::new(),
            retired: HashMap::new(),
            next_id: 1,
        }
    }

    async fn handle(&mut self, text: &str) -> Option<String> {
        let frame = match serde_json::from_str::<RequestFrame>(text) {
            Ok(frame) => frame,
            Err(e) => {
                let request_id = serde_json::from_str::<Value>(text)
                    .ok()
                    .and_then(|v| v.get("requestId").and_then(Value::as_u64));
                warn!(request_id = ?request_id, error = %e, "malformed cache relay request");
                let request_id = request_id?;
                return encode(&ResponseFrame::Error {
                    request_id,
                    error: format!("malformed request: {e}"),
                });
            }
        };

        let tag = frame.op.tag();
        let reply = match self.apply(frame.op).await {
            Ok(result) => ResponseFrame::Response {
                request_id: frame.request_id,
                result,
            },
            Err(e) => {
                debug!(op = tag, request_id = frame.request_id, error = %e, "cache relay call failed");
                ResponseFrame::Error {
                    request_id: frame.request_id,
                    error: e.as_message(),
                }
            }
        };
        encode(&reply)
    }

    async fn apply(&mut self, op: CacheOp) -> Result<Value, RuntimeError> {
        match op {
            CacheOp::Open { cache_name } => {
                let cache = self.storage.open_cache(&cache_name).await?;
                to_value(self.id_for(&cache_name, cache))
            }
            CacheOp::Match {
                cache_id,
                request,
                options,
            } => to_value(self.cache(cache_id)?.match_one(&request, options).await?),
            CacheOp::MatchAll {
                cache_id,
                request,
                options,
            } => to_value(
                self.cache(cache_id)?
                    .match_all(request.as_ref(), options)
                    .await?,
            ),
            CacheOp::Put {
                cache_id,
                request,
                response,
            } => to_value(self.cache(cache_id)?.put(request, response).await?),
            CacheOp::Delete {
                cache_id,
                request,
                options,
            } => to_value(self.cache(cache_id)?.delete(&request, options).await?),
            CacheOp::Keys {
                cache_id,
                request,
                options,
            } => to_value(self.cache(cache_id)?.keys(request.as_ref(), options).await?),
            CacheOp::StorageHas { cache_name } => to_value(self.storage.has(&cache_name).await?),
            CacheOp::StorageDelete { cache_name } => {
                let deleted = self.storage.delete(&cache_name).await;
                self.retire(&cache_name);
                to_value(deleted?)
            }
            CacheOp::StorageKeys {} => to_value(self.storage.keys().await?),
            CacheOp::StorageMatch { request, options } => {
                to_value(self.storage.match_any(&request, options).await?)
            }
        }
    }

    fn id_for(&mut self, name: &str, cache: Arc<Cache>) -> u64 {
        if let Some(&id) = self.names.get(name) {
            if self.live.get(&id).is_some_and(|c| Arc::ptr_eq(c, &cache)) {
                return id;
            }
            // Replaced behind the owner's back (deleted on the storage directly).
            self.retire(name);
        }
        let id = self.next_id;
        self.next_id += 1;
        self.live.insert(id, cache);
        self.names.insert(name.to_string(), id);
        id
    }

    fn retire(&mut self, name: &str) {
        if let Some(id) = self.names.remove(name) {
            self.live.remove(&id);
            self.retired.insert(id, name.to_string());
        }
    }

    fn cache(&self, id: u64) -> Result<Arc<Cache>, RuntimeError> {
        if let Some(cache) = self.live.get(&id) {
            return Ok(Arc::clone(cache));
        }
        Err(match self.retired.get(&id) {
            Some(name) => RuntimeError::invalid_state(format!("cache '{name}' is disposed")),
            None => RuntimeError::invalid_state(format!("cache #{id} is not open on the owner")),
        })
    }
}

fn to_value<T: Serialize>(value: T) -> Result<Value, RuntimeError> {
    serde_json::to_value(value).map_err(|e| RuntimeError::transport(e.to_string()))
}

fn encode(frame: &ResponseFrame) -> Option<String> {
    match serde_json::to_string(frame) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!(request_id = frame.request_id(), error = %e, "cache relay reply not serializable");
            None
        }
    }
}
