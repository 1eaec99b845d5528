//! Cache relay wire format.
//!
//! Requests: `{"type": "cache:put", "requestId": 7, "cacheId": 1, ...}`.
//! Responses: `{"type": "cache:response", "requestId": 7, "result": ...}` or
//! `{"type": "cache:error", "requestId": 7, "error": "flat message"}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::MatchOptions;
use crate::http::{Request, Response};

/// One operation a client asks the owner to perform.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum CacheOp {
    /// Open (or create) a cache; result: `u64` cache id.
    #[serde(rename = "cache:open")]
    Open { cache_name: String },
    /// Result: `Option<Response>`.
    #[serde(rename = "cache:match")]
    Match {
        cache_id: u64,
        request: Request,
        #[serde(default)]
        options: MatchOptions,
    },
    /// Result: `Vec<Response>`.
    #[serde(rename = "cache:matchAll")]
    MatchAll {
        cache_id: u64,
        #[serde(default)]
        request: Option<Request>,
        #[serde(default)]
        options: MatchOptions,
    },
    /// Result: `null`.
    #[serde(rename = "cache:put")]
    Put {
        cache_id: u64,
        request: Request,
        response: Response,
    },
    /// Result: `bool`.
    #[serde(rename = "cache:delete")]
    Delete {
        cache_id: u64,
        request: Request,
        #[serde(default)]
        options: MatchOptions,
    },
    /// Result: `Vec<Request>`.
    #[serde(rename = "cache:keys")]
    Keys {
        cache_id: u64,
        #[serde(default)]
        request: Option<Request>,
        #[serde(default)]
        options: MatchOptions,
    },
    /// Result: `bool`.
    #[serde(rename = "cachestorage:has")]
    StorageHas { cache_name: String },
    /// Result: `bool`.
    #[serde(rename = "cachestorage:delete")]
    StorageDelete { cache_name: String },
    /// Result: `Vec<String>`.
    #[serde(rename = "cachestorage:keys")]
    StorageKeys {},
    /// Result: `Option<Response>`.
    #[serde(rename = "cachestorage:match")]
    StorageMatch {
        request: Request,
        #[serde(default)]
        options: MatchOptions,
    },
}

impl CacheOp {
    /// Wire `type` tag.
    pub fn tag(&self) -> &'static str {
        match self {
            CacheOp::Open { .. } => "cache:open",
            CacheOp::Match { .. } => "cache:match",
            CacheOp::MatchAll { .. } => "cache:matchAll",
            CacheOp::Put { .. } => "cache:put",
            CacheOp::Delete { .. } => "cache:delete",
            CacheOp::Keys { .. } => "cache:keys",
            CacheOp::StorageHas { .. } => "cachestorage:has",
            CacheOp::StorageDelete { .. } => "cachestorage:delete",
            CacheOp::StorageKeys {} => "cachestorage:keys",
            CacheOp::StorageMatch { .. } => "cachestorage:match",
        }
    }
}

/// A request frame: correlation id plus the flattened operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestFrame {
    pub request_id: u64,
    #[serde(flatten)]
    pub op: CacheOp,
}

/// A response frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ResponseFrame {
    #[serde(rename = "cache:response")]
    Response { request_id: u64, result: Value },
    #[serde(rename = "cache:error")]
    Error { request_id: u64, error: String },
}

impl ResponseFrame {
    /// Correlation id of the request this frame answers.
    pub fn request_id(&self) -> u64 {
        match self {
            ResponseFrame::Response { request_id, .. } | ResponseFrame::Error { request_id, .. } => {
                *request_id
            }
        }
    }
}
