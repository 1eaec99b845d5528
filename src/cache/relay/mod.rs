//! Relayed cache shape: one authoritative owner, many thin clients.
//!
//! - [`CacheOwner`]: serializes every call against one [`CacheStorage`](crate::cache::CacheStorage)
//! - [`RemoteCacheStorage`] / [`RemoteCache`]: proxies speaking the JSON frames in [`protocol`]

mod client;
mod owner;
pub mod protocol;

pub use client::{RemoteCache, RemoteCacheStorage};
pub use owner::{CacheOwner, RelayConnection};
