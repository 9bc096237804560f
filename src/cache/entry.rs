//! Cache entry and lookup metadata.

use std::time::Duration;
use tokio::time::Instant;

/// A stored read result with its freshness window.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
  /// The cached value
  pub data: T,
  /// When the value was stored
  pub stored_at: Instant,
  /// How long the value stays valid
  pub ttl: Duration,
}

impl<T> CacheEntry<T> {
  pub fn new(data: T, ttl: Duration) -> Self {
    Self {
      data,
      stored_at: Instant::now(),
      ttl,
    }
  }

  /// An entry is valid while `now - stored_at <= ttl`.
  pub fn is_valid(&self) -> bool {
    self.stored_at.elapsed() <= self.ttl
  }

  /// Time left before the entry expires.
  pub fn remaining(&self) -> Duration {
    self.ttl.saturating_sub(self.stored_at.elapsed())
  }
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Served from the cache store
  Cache,
  /// Joined an identical in-flight request
  Deduplicated,
  /// Fresh data from the network
  Network,
  /// Write buffered while offline
  Offline,
}

impl CacheSource {
  pub fn is_hit(&self) -> bool {
    matches!(self, CacheSource::Cache)
  }
}
