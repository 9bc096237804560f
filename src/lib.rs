//! courier - client-side request orchestration for HTTP backends.
//!
//! Sits between application code and a remote API and provides:
//! - TTL response caching with per-endpoint policies
//! - Coalescing of concurrent identical reads
//! - Per-attempt timeouts with exponential-backoff retries
//! - Pattern-based cache invalidation and typed mutation events
//! - A durable queue for writes issued while offline

pub mod bus;
pub mod cache;
pub mod client;
pub mod config;
pub mod dedup;
pub mod error;
pub mod event;
pub mod logging;
pub mod offline;

pub use bus::{MutationEvent, MutationKind, MutationType, Subscription};
pub use client::{ApiClient, ApiClientBuilder, ApiResponse, Envelope, Mutation};
pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use event::ClientEvent;
