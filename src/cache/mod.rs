//! Response caching for read requests.
//!
//! This module provides:
//! - Deterministic cache keys derived from method, endpoint and body
//! - A TTL store with lazy eviction of stale entries
//! - A per-endpoint policy table that picks the TTL at write time

mod entry;
mod key;
mod policy;
mod store;

pub use entry::{CacheEntry, CacheSource};
pub use key::{CacheKey, Method};
pub use policy::{EndpointPolicy, PolicyTable, DEFAULT_TTL};
pub use store::CacheStore;
