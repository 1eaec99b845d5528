//! Request/response values exchanged at the HTTP boundary and stored in caches.
//!
//! These are plain data: they serialize to JSON so a cache owner in another
//! context can store them, and they carry no connection state.

mod headers;
mod request;
mod response;

pub use headers::Headers;
pub use request::Request;
pub use response::Response;
