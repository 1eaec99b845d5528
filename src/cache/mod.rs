//! # Cache coordination.
//!
//! Two shapes behind the same worker-facing traits ([`CacheStorageApi`], [`CacheApi`]):
//!
//! ```text
//! local:    worker ──► CacheStorage ──► Cache ──► CacheBackend (memory | fs)
//!
//! relayed:  worker ──► RemoteCacheStorage ──frames──► CacheOwner ──► CacheStorage ──► ...
//!           worker ──► RemoteCacheStorage ──frames──┘
//! ```
//!
//! Backends are chosen by name through [`resolve_backend`].

mod api;
mod backend;
mod factory;
mod fs;
mod key;
mod local;
mod memory;
pub mod relay;
mod storage;

pub use api::{CacheApi, CacheHandle, CacheStorageApi};
pub use backend::{CacheBackend, Fetch, FetchFn, FetchRef, NoNetwork};
pub use factory::{
    BackendFactory, FactoryRef, FsFactory, MemoryFactory, backend_table, resolve_backend,
};
pub use fs::FsBackend;
pub use key::{CacheEntry, CacheKey, MatchOptions};
pub use local::Cache;
pub use memory::MemoryBackend;
pub use relay::{CacheOwner, RelayConnection, RemoteCache, RemoteCacheStorage};
pub use storage::CacheStorage;
