//! Cache invalidation and mutation notifications.
//!
//! Two registries live here:
//! - invalidation listeners, called with the keys removed by [`Bus::invalidate`]
//! - mutation listeners, keyed by [`MutationType`] (e.g. `client:created`)
//!
//! Fan-out is synchronous. A listener that fails or panics is logged and
//! skipped; the remaining listeners still run.

use color_eyre::Result;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::cache::CacheStore;
use crate::client::ApiResponse;

/// Kind of write that happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
  Created,
  Updated,
  Deleted,
}

impl MutationKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      MutationKind::Created => "created",
      MutationKind::Updated => "updated",
      MutationKind::Deleted => "deleted",
    }
  }
}

/// Typed mutation channel, rendered as `entity:kind`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MutationType {
  pub entity: String,
  pub kind: MutationKind,
}

impl MutationType {
  pub fn new(entity: impl Into<String>, kind: MutationKind) -> Self {
    Self {
      entity: entity.into(),
      kind,
    }
  }

  pub fn created(entity: impl Into<String>) -> Self {
    Self::new(entity, MutationKind::Created)
  }

  pub fn updated(entity: impl Into<String>) -> Self {
    Self::new(entity, MutationKind::Updated)
  }

  pub fn deleted(entity: impl Into<String>) -> Self {
    Self::new(entity, MutationKind::Deleted)
  }
}

impl fmt::Display for MutationType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.entity, self.kind.as_str())
  }
}

impl std::str::FromStr for MutationType {
  type Err = String;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    let (entity, kind) = s
      .rsplit_once(':')
      .ok_or_else(|| format!("Expected entity:kind, got '{}'", s))?;
    let kind = match kind {
      "created" => MutationKind::Created,
      "updated" => MutationKind::Updated,
      "deleted" => MutationKind::Deleted,
      other => return Err(format!("Unknown mutation kind '{}'", other)),
    };
    Ok(Self::new(entity, kind))
  }
}

/// A delivered mutation notification.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationEvent {
  pub mutation: MutationType,
  pub payload: Value,
}

type InvalidationListener = Arc<dyn Fn(&[String]) -> Result<()> + Send + Sync>;
type MutationListener = Arc<dyn Fn(&MutationEvent) -> Result<()> + Send + Sync>;

/// Handle returned by registration; call [`Subscription::unsubscribe`] to
/// remove the listener. Dropping the handle leaves the listener registered.
pub struct Subscription {
  cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
  fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
    Self {
      cancel: Some(Box::new(cancel)),
    }
  }

  pub fn unsubscribe(mut self) {
    if let Some(cancel) = self.cancel.take() {
      cancel();
    }
  }
}

impl fmt::Debug for Subscription {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Subscription")
      .field("active", &self.cancel.is_some())
      .finish()
  }
}

#[derive(Default)]
struct Registries {
  invalidation: Vec<(u64, InvalidationListener)>,
  mutation: Vec<(u64, MutationType, MutationListener)>,
}

/// Invalidation and mutation pub/sub over the shared cache store.
pub struct Bus {
  cache: Arc<CacheStore<ApiResponse>>,
  registries: Arc<Mutex<Registries>>,
  next_id: AtomicU64,
}

impl Bus {
  pub fn new(cache: Arc<CacheStore<ApiResponse>>) -> Self {
    Self {
      cache,
      registries: Arc::new(Mutex::new(Registries::default())),
      next_id: AtomicU64::new(1),
    }
  }

  fn registries(&self) -> std::sync::MutexGuard<'_, Registries> {
    self.registries.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Evict every cache key matching any pattern and notify invalidation
  /// listeners with the removed keys. Nothing is notified when no key matched.
  pub fn invalidate<P: AsRef<str>>(&self, patterns: &[P]) -> Vec<String> {
    let mut removed: Vec<String> = Vec::new();
    for pattern in patterns {
      removed.extend(self.cache.evict(pattern.as_ref()));
    }

    if removed.is_empty() {
      return removed;
    }

    debug!(count = removed.len(), "invalidated cache keys");

    // Snapshot so listeners may (un)subscribe without deadlocking
    let listeners: Vec<InvalidationListener> = self
      .registries()
      .invalidation
      .iter()
      .map(|(_, l)| Arc::clone(l))
      .collect();

    for listener in listeners {
      deliver("invalidation", || listener(&removed[..]));
    }

    removed
  }

  pub fn on_invalidation<F>(&self, listener: F) -> Subscription
  where
    F: Fn(&[String]) -> Result<()> + Send + Sync + 'static,
  {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    let listener: InvalidationListener = Arc::new(listener);
    self.registries().invalidation.push((id, listener));

    let registries = Arc::downgrade(&self.registries);
    Subscription::new(move || {
      if let Some(registries) = registries.upgrade() {
        let mut registries = registries.lock().unwrap_or_else(|e| e.into_inner());
        registries.invalidation.retain(|(lid, _)| *lid != id);
      }
    })
  }

  /// Deliver a mutation to every listener registered for its type.
  ///
  /// Returns how many listeners handled it successfully.
  pub fn notify_mutation(&self, mutation: MutationType, payload: Value) -> usize {
    let listeners: Vec<MutationListener> = self
      .registries()
      .mutation
      .iter()
      .filter(|(_, ty, _)| *ty == mutation)
      .map(|(_, _, l)| Arc::clone(l))
      .collect();

    debug!(mutation = %mutation, listeners = listeners.len(), "mutation notified");

    let event = MutationEvent { mutation, payload };
    listeners
      .into_iter()
      .filter(|listener| deliver("mutation", || listener(&event)))
      .count()
  }

  pub fn on_mutation<F>(&self, mutation: MutationType, listener: F) -> Subscription
  where
    F: Fn(&MutationEvent) -> Result<()> + Send + Sync + 'static,
  {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    let listener: MutationListener = Arc::new(listener);
    self.registries().mutation.push((id, mutation, listener));

    let registries = Arc::downgrade(&self.registries);
    Subscription::new(move || {
      if let Some(registries) = registries.upgrade() {
        let mut registries = registries.lock().unwrap_or_else(|e| e.into_inner());
        registries.mutation.retain(|(lid, _, _)| *lid != id);
      }
    })
  }

  pub fn listener_count(&self) -> usize {
    let registries = self.registries();
    registries.invalidation.len() + registries.mutation.len()
  }
}

/// Run one listener, isolating errors and panics. Returns whether it succeeded.
fn deliver(channel: &str, call: impl FnOnce() -> Result<()>) -> bool {
  match catch_unwind(AssertUnwindSafe(call)) {
    Ok(Ok(())) => true,
    Ok(Err(e)) => {
      warn!(channel, error = %e, "listener failed");
      false
    }
    Err(_) => {
      warn!(channel, "listener panicked");
      false
    }
  }
}
