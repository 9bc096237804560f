//! Timing and cache hit/miss reporting.

use std::time::Duration;
use tracing::debug;

use crate::cache::{CacheKey, CacheSource};

/// Observes every facade call. Never influences control flow.
pub trait PerformanceObserver: Send + Sync {
  fn request_started(&self, _key: &CacheKey) {}

  fn request_finished(&self, _key: &CacheKey, _elapsed: Duration, _source: CacheSource, _ok: bool) {}

  fn cache_lookup(&self, _key: &CacheKey, _hit: bool) {}
}

/// Observer that reports through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl PerformanceObserver for TracingObserver {
  fn request_finished(&self, key: &CacheKey, elapsed: Duration, source: CacheSource, ok: bool) {
    debug!(
      key = %key,
      elapsed_ms = elapsed.as_millis() as u64,
      source = ?source,
      ok,
      "request finished"
    );
  }

  fn cache_lookup(&self, key: &CacheKey, hit: bool) {
    debug!(key = %key, hit, "cache lookup");
  }
}
