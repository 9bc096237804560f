//! HTTP client surface.
//!
//! [`ApiClient`] composes the cache, deduplicator, executor, bus and offline
//! queue around a single [`Transport`] call. Collaborators (session, login
//! navigation, connectivity, performance reporting) are traits so host
//! applications can plug in their own.

mod endpoint;
mod envelope;
mod executor;
mod facade;
mod mutation;
mod observer;
mod session;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use endpoint::UrlBuilder;
pub use envelope::{decode_success, ApiResponse, BinaryPayload, Envelope};
pub use executor::{backoff_delay, Executor, ExecutorSettings};
pub use facade::{ApiClient, ApiClientBuilder};
pub use mutation::Mutation;
pub use observer::{PerformanceObserver, TracingObserver};
pub use session::{LogNavigator, MemorySession, Navigator, SessionStore};
pub use transport::{ReqwestTransport, Transport, TransportRequest, TransportResponse};
