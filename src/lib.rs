//! A concurrent caching HTTP/1.0 forward proxy.
//!
//! Clients send absolute-form GET requests; the proxy forwards them to the
//! origin server, streams the response back, and keeps small response
//! objects in a shared in-memory cache for later identical requests.

/// Shared in-memory response cache with approximate-LRU eviction.
pub mod cache;
mod parse;
/// Per-connection request pipeline and the accept loop driving it.
pub mod proxy;
mod util;

pub use cache::Cache;
pub use parse::{ErrorResponse, Origin, RequestLine};
pub use proxy::{Proxy, ProxyError};

/// Largest response, in bytes, that may be admitted to the cache.
pub const MAX_OBJECT_SIZE: usize = 102_400;
/// Upper bound on the summed size of all cached objects.
pub const MAX_CACHE_SIZE: usize = 1_049_000;

/// How much data to read for a single request or header line before it's considered invalid.
pub(crate) const LINE_MAX_LENGTH: usize = 8192;
