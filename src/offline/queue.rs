//! Buffering of writes issued while offline.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{error, info};

use super::connectivity::ConnectivityProbe;
use super::storage::{QueueStorage, QueuedWriteOp};
use crate::cache::Method;
use crate::event::{ClientEvent, EventHandler};

/// Durable queue of writes awaiting replay.
///
/// Replay itself belongs to the host application: it reads [`pending`],
/// re-issues each op once online, and calls [`remove`].
///
/// [`pending`]: OfflineQueue::pending
/// [`remove`]: OfflineQueue::remove
#[derive(Clone)]
pub struct OfflineQueue {
  storage: Arc<dyn QueueStorage>,
  probe: Arc<dyn ConnectivityProbe>,
  events: EventHandler,
}

impl OfflineQueue {
  pub fn new(
    storage: Arc<dyn QueueStorage>,
    probe: Arc<dyn ConnectivityProbe>,
    events: EventHandler,
  ) -> Self {
    Self {
      storage,
      probe,
      events,
    }
  }

  pub fn is_online(&self) -> bool {
    self.probe.is_online()
  }

  /// Queue a write when offline. Returns whether the caller should skip the
  /// network call.
  ///
  /// Reads and online writes are never queued. A write that cannot be
  /// persisted still returns `true` so the caller is not blocked; the loss
  /// is logged and published as [`ClientEvent::OfflineWriteDropped`].
  pub fn enqueue_if_offline(&self, method: Method, endpoint: &str, body: Option<&str>) -> bool {
    if method.is_read() || self.probe.is_online() {
      return false;
    }

    match self.storage.append(method, endpoint, body) {
      Ok(id) => {
        info!(id, method = %method, endpoint, "queued write while offline");
        self.events.send(ClientEvent::OfflineWriteQueued {
          endpoint: endpoint.to_string(),
        });
      }
      Err(e) => {
        error!(method = %method, endpoint, error = %e, "failed to persist offline write, dropping it");
        self.events.send(ClientEvent::OfflineWriteDropped {
          endpoint: endpoint.to_string(),
          error: e.to_string(),
        });
      }
    }

    true
  }

  pub fn pending(&self) -> Result<Vec<QueuedWriteOp>> {
    self.storage.list()
  }

  pub fn remove(&self, id: i64) -> Result<bool> {
    self.storage.remove(id)
  }

  /// Take every queued op, oldest first, leaving the queue empty.
  pub fn drain(&self) -> Result<Vec<QueuedWriteOp>> {
    let ops = self.storage.list()?;
    for op in &ops {
      self.storage.remove(op.id)?;
    }
    Ok(ops)
  }

  pub fn clear(&self) -> Result<usize> {
    self.storage.clear()
  }

  pub fn len(&self) -> Result<usize> {
    Ok(self.storage.list()?.len())
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::offline::{ConnectivityFlag, SqliteQueueStorage};
  use color_eyre::eyre::eyre;

  struct BrokenStorage;

  impl QueueStorage for BrokenStorage {
    fn append(&self, _method: Method, _endpoint: &str, _body: Option<&str>) -> Result<i64> {
      Err(eyre!("disk full"))
    }

    fn list(&self) -> Result<Vec<QueuedWriteOp>> {
      Ok(Vec::new())
    }

    fn remove(&self, _id: i64) -> Result<bool> {
      Ok(false)
    }

    fn clear(&self) -> Result<usize> {
      Ok(0)
    }
  }

  fn queue(online: bool) -> (OfflineQueue, Arc<ConnectivityFlag>, EventHandler) {
    let flag = Arc::new(ConnectivityFlag::new(online));
    let events = EventHandler::default();
    let queue = OfflineQueue::new(
      Arc::new(SqliteQueueStorage::open_in_memory().unwrap()),
      flag.clone(),
      events.clone(),
    );
    (queue, flag, events)
  }

  #[test]
  fn test_online_writes_are_not_queued() {
    let (queue, _flag, _events) = queue(true);
    assert!(!queue.enqueue_if_offline(Method::Post, "/clients/", Some("{}")));
    assert!(queue.is_empty().unwrap());
  }

  #[test]
  fn test_reads_are_never_queued() {
    let (queue, _flag, _events) = queue(false);
    assert!(!queue.enqueue_if_offline(Method::Get, "/clients/", None));
    assert!(queue.is_empty().unwrap());
  }

  #[test]
  fn test_offline_write_is_persisted() {
    let (queue, flag, events) = queue(false);
    let mut rx = events.subscribe();

    assert!(queue.enqueue_if_offline(Method::Put, "/clients/5/", Some(r#"{"name":"Bo"}"#)));

    let ops = queue.pending().unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].endpoint, "/clients/5/");
    assert_eq!(ops[0].method, Method::Put);
    assert_eq!(
      rx.try_recv().unwrap(),
      ClientEvent::OfflineWriteQueued {
        endpoint: "/clients/5/".into()
      }
    );

    flag.set_online(true);
    assert!(!queue.enqueue_if_offline(Method::Put, "/clients/5/", None));
    assert_eq!(queue.len().unwrap(), 1);
  }

  #[test]
  fn test_drain_empties_queue() {
    let (queue, _flag, _events) = queue(false);
    queue.enqueue_if_offline(Method::Post, "/a/", Some("{}"));
    queue.enqueue_if_offline(Method::Delete, "/b/1/", None);

    let drained = queue.drain().unwrap();
    assert_eq!(
      drained.iter().map(|op| op.endpoint.as_str()).collect::<Vec<_>>(),
      vec!["/a/", "/b/1/"]
    );
    assert!(queue.is_empty().unwrap());
  }

  #[test]
  fn test_persistence_failure_does_not_block() {
    let events = EventHandler::default();
    let mut rx = events.subscribe();
    let queue = OfflineQueue::new(
      Arc::new(BrokenStorage),
      Arc::new(ConnectivityFlag::new(false)),
      events,
    );

    assert!(queue.enqueue_if_offline(Method::Post, "/clients/", Some("{}")));
    assert!(matches!(
      rx.try_recv().unwrap(),
      ClientEvent::OfflineWriteDropped { ref error, .. } if error.contains("disk full")
    ));
  }
}
