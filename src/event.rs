//! Client-wide events broadcast to any interested surface.

use serde::Serialize;
use tokio::sync::broadcast;

/// Events published by the request layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
  /// A non-login endpoint answered 401; the session has been cleared
  SessionExpired { endpoint: String },
  /// A write was buffered because the client is offline
  OfflineWriteQueued { endpoint: String },
  /// A write issued while offline could not be persisted and is lost
  OfflineWriteDropped { endpoint: String, error: String },
}

/// Broadcast channel for [`ClientEvent`]s.
#[derive(Clone)]
pub struct EventHandler {
  tx: broadcast::Sender<ClientEvent>,
}

impl EventHandler {
  pub fn new(capacity: usize) -> Self {
    let (tx, _) = broadcast::channel(capacity);
    Self { tx }
  }

  /// Publish to all subscribers. Dropped silently when nobody listens.
  pub fn send(&self, event: ClientEvent) {
    let _ = self.tx.send(event);
  }

  pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
    self.tx.subscribe()
  }

  pub fn receiver_count(&self) -> usize {
    self.tx.receiver_count()
  }
}

impl Default for EventHandler {
  fn default() -> Self {
    Self::new(64)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_multiple_subscribers() {
    let events = EventHandler::default();
    let mut rx1 = events.subscribe();
    let mut rx2 = events.subscribe();

    events.send(ClientEvent::SessionExpired {
      endpoint: "/clients/".into(),
    });

    assert!(matches!(
      rx1.recv().await,
      Ok(ClientEvent::SessionExpired { .. })
    ));
    assert!(matches!(
      rx2.recv().await,
      Ok(ClientEvent::SessionExpired { .. })
    ));
  }

  #[test]
  fn test_send_without_subscribers() {
    let events = EventHandler::default();
    assert_eq!(events.receiver_count(), 0);
    events.send(ClientEvent::OfflineWriteQueued {
      endpoint: "/clients/".into(),
    });
  }

  #[test]
  fn test_serialization() {
    let event = ClientEvent::OfflineWriteDropped {
      endpoint: "/clients/5/".into(),
      error: "disk full".into(),
    };
    let json = serde_json::to_string(&event).unwrap();
    assert!(json.contains(r#""type":"offline_write_dropped""#));
    assert!(json.contains(r#""endpoint":"/clients/5/""#));
  }
}
