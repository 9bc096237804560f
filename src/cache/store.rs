//! TTL-keyed store of successful read results.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use super::entry::CacheEntry;
use super::key::CacheKey;
use super::policy::PolicyTable;

/// In-memory cache of read results.
///
/// Entries are binary valid/invalid: a stale entry is removed on the lookup
/// that finds it and reported as a miss. No network I/O happens here.
pub struct CacheStore<T> {
  entries: Mutex<HashMap<String, CacheEntry<T>>>,
  policies: PolicyTable,
}

impl<T: Clone> CacheStore<T> {
  pub fn new(policies: PolicyTable) -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
      policies,
    }
  }

  fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry<T>>> {
    // Critical sections never panic mid-update, so a poisoned map is still consistent
    self.entries.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Return the stored value if it is still valid.
  pub fn lookup(&self, key: &CacheKey) -> Option<T> {
    let mut entries = self.entries();
    let entry = entries.get(key.as_str())?;

    if entry.is_valid() {
      debug!(key = %key, remaining_ms = entry.remaining().as_millis() as u64, "cache hit");
      return Some(entry.data.clone());
    }

    debug!(key = %key, "cache entry expired");
    entries.remove(key.as_str());
    None
  }

  /// Store a value, overwriting any previous entry for the key.
  ///
  /// TTL resolution: explicit `ttl` > first matching endpoint policy >
  /// default TTL.
  pub fn store(&self, key: &CacheKey, data: T, ttl: Option<Duration>) -> Duration {
    let ttl = ttl.unwrap_or_else(|| self.policies.resolve_ttl(key.endpoint()));
    self
      .entries()
      .insert(key.as_str().to_string(), CacheEntry::new(data, ttl));
    debug!(key = %key, ttl_secs = ttl.as_secs(), "cached response");
    ttl
  }

  /// Remove every key equal to or containing `pattern`.
  ///
  /// Returns the removed keys.
  pub fn evict(&self, pattern: &str) -> Vec<String> {
    let mut entries = self.entries();
    let removed: Vec<String> = entries
      .keys()
      .filter(|k| k.as_str() == pattern || k.contains(pattern))
      .cloned()
      .collect();

    for key in &removed {
      entries.remove(key);
    }

    removed
  }

  /// Drop every entry.
  pub fn clear(&self) -> Vec<String> {
    self.entries().drain().map(|(k, _)| k).collect()
  }

  /// Number of entries, including any not yet lazily evicted.
  pub fn len(&self) -> usize {
    self.entries().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Sorted key listing, for diagnostics.
  pub fn keys(&self) -> Vec<String> {
    let mut keys: Vec<String> = self.entries().keys().cloned().collect();
    keys.sort();
    keys
  }

  pub fn policies(&self) -> &PolicyTable {
    &self.policies
  }
}

impl<T: Clone> Default for CacheStore<T> {
  fn default() -> Self {
    Self::new(PolicyTable::default())
  }
}
