//! Coalescing of concurrent identical requests.
//!
//! Calls sharing a cache key within the dedup window await one in-flight
//! operation and observe the same settlement, success or failure.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::cache::CacheKey;
use crate::error::{ApiError, ApiResult};

/// Default window during which identical requests are coalesced.
pub const DEDUP_WINDOW: Duration = Duration::from_secs(1);

type SharedResult<T> = Shared<BoxFuture<'static, ApiResult<T>>>;

/// One in-flight operation.
struct PendingRequest<T> {
  future: SharedResult<T>,
  started_at: Instant,
  id: u64,
}

type PendingTable<T> = Arc<Mutex<HashMap<String, PendingRequest<T>>>>;

/// Registry of in-flight requests, at most one per cache key.
pub struct Deduplicator<T> {
  pending: PendingTable<T>,
  window: Duration,
  next_id: AtomicU64,
}

impl<T> Deduplicator<T>
where
  T: Clone + Send + Sync + 'static,
{
  pub fn new(window: Duration) -> Self {
    Self {
      pending: Arc::new(Mutex::new(HashMap::new())),
      window,
      next_id: AtomicU64::new(1),
    }
  }

  /// Join the in-flight request for `key`, or start one with `factory`.
  ///
  /// A pending entry older than the window is replaced by a new call. The
  /// operation runs on its own task, so it settles and deregisters even if
  /// every waiter goes away. Returns the result and whether this caller
  /// joined an existing request.
  pub async fn coalesce<F, Fut>(&self, key: &CacheKey, factory: F) -> (ApiResult<T>, bool)
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ApiResult<T>> + Send + 'static,
  {
    let (future, joined) = {
      let mut pending = lock(&self.pending);

      let existing = pending
        .get(key.as_str())
        .filter(|p| p.started_at.elapsed() <= self.window)
        .map(|p| p.future.clone());

      if let Some(future) = existing {
        debug!(key = %key, "joining in-flight request");
        (future, true)
      } else {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let operation = factory();
        let table = Arc::clone(&self.pending);
        let owned_key = key.as_str().to_string();

        // Registered below while the lock is still held, so the task
        // cannot deregister before the entry exists.
        let task = tokio::spawn(async move {
          let result = operation.await;
          let mut pending = lock(&table);
          if pending.get(&owned_key).map(|p| p.id) == Some(id) {
            pending.remove(&owned_key);
          }
          result
        });

        let future = async move {
          task
            .await
            .unwrap_or_else(|e| Err(ApiError::Network(format!("Request task failed: {}", e))))
        }
        .boxed()
        .shared();

        pending.insert(
          key.as_str().to_string(),
          PendingRequest {
            future: future.clone(),
            started_at: Instant::now(),
            id,
          },
        );
        (future, false)
      }
    };

    (future.await, joined)
  }

  /// Number of requests currently in flight.
  pub fn len(&self) -> usize {
    lock(&self.pending).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn window(&self) -> Duration {
    self.window
  }
}

impl<T> Default for Deduplicator<T>
where
  T: Clone + Send + Sync + 'static,
{
  fn default() -> Self {
    Self::new(DEDUP_WINDOW)
  }
}

fn lock<T>(
  table: &Mutex<HashMap<String, PendingRequest<T>>>,
) -> std::sync::MutexGuard<'_, HashMap<String, PendingRequest<T>>> {
  table.lock().unwrap_or_else(|e| e.into_inner())
}
