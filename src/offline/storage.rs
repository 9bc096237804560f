//! Queue storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::cache::Method;

/// A write buffered while offline.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedWriteOp {
  /// Storage-assigned id, used to remove the op once replayed
  pub id: i64,
  pub method: Method,
  pub endpoint: String,
  /// Serialized JSON body, if any
  pub body: Option<String>,
  pub queued_at: DateTime<Utc>,
}

/// Durable backing store for the offline queue.
pub trait QueueStorage: Send + Sync {
  /// Append an op and return its id.
  fn append(&self, method: Method, endpoint: &str, body: Option<&str>) -> Result<i64>;

  /// All ops in insertion order.
  fn list(&self) -> Result<Vec<QueuedWriteOp>>;

  /// Remove one op. Returns whether it existed.
  fn remove(&self, id: i64) -> Result<bool>;

  /// Remove every op. Returns how many were removed.
  fn clear(&self) -> Result<usize>;
}

/// SQLite-based queue storage.
pub struct SqliteQueueStorage {
  conn: Mutex<Connection>,
}

impl SqliteQueueStorage {
  /// Open the queue database at `path`, or at the default location.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create queue directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open queue database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Queue that lives only as long as the process.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory queue database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("courier").join("offline.db"))
  }

  fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  fn run_migrations(&self) -> Result<()> {
    self
      .conn()?
      .execute_batch(QUEUE_SCHEMA)
      .map_err(|e| eyre!("Failed to run queue migrations: {}", e))?;

    Ok(())
  }
}

const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS offline_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    method TEXT NOT NULL,
    endpoint TEXT NOT NULL,
    body TEXT,
    queued_at TEXT NOT NULL
);
"#;

impl QueueStorage for SqliteQueueStorage {
  fn append(&self, method: Method, endpoint: &str, body: Option<&str>) -> Result<i64> {
    let conn = self.conn()?;

    conn
      .execute(
        "INSERT INTO offline_queue (method, endpoint, body, queued_at) VALUES (?, ?, ?, ?)",
        params![method.as_str(), endpoint, body, Utc::now().to_rfc3339()],
      )
      .map_err(|e| eyre!("Failed to queue write: {}", e))?;

    Ok(conn.last_insert_rowid())
  }

  fn list(&self) -> Result<Vec<QueuedWriteOp>> {
    let conn = self.conn()?;

    let mut stmt = conn
      .prepare("SELECT id, method, endpoint, body, queued_at FROM offline_queue ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare queue query: {}", e))?;

    let rows: Vec<(i64, String, String, Option<String>, String)> = stmt
      .query_map([], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
      })
      .map_err(|e| eyre!("Failed to query queue: {}", e))?
      .collect::<std::result::Result<_, _>>()
      .map_err(|e| eyre!("Failed to read queued write: {}", e))?;

    rows
      .into_iter()
      .map(|(id, method, endpoint, body, queued_at)| {
        Ok(QueuedWriteOp {
          id,
          method: method.parse().map_err(|e: String| eyre!(e))?,
          endpoint,
          body,
          queued_at: parse_datetime(&queued_at)?,
        })
      })
      .collect()
  }

  fn remove(&self, id: i64) -> Result<bool> {
    let removed = self
      .conn()?
      .execute("DELETE FROM offline_queue WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove queued write: {}", e))?;
    Ok(removed > 0)
  }

  fn clear(&self) -> Result<usize> {
    self
      .conn()?
      .execute("DELETE FROM offline_queue", [])
      .map_err(|e| eyre!("Failed to clear queue: {}", e))
  }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_append_and_list_in_order() {
    let storage = SqliteQueueStorage::open_in_memory().unwrap();
    let first = storage
      .append(Method::Post, "/clients/", Some(r#"{"name":"Ada"}"#))
      .unwrap();
    let second = storage.append(Method::Delete, "/clients/5/", None).unwrap();
    assert!(second > first);

    let ops = storage.list().unwrap();
    assert_eq!(ops.len(), 2);
    assert_eq!(ops[0].method, Method::Post);
    assert_eq!(ops[0].body.as_deref(), Some(r#"{"name":"Ada"}"#));
    assert_eq!(ops[1].endpoint, "/clients/5/");
    assert_eq!(ops[1].body, None);
  }

  #[test]
  fn test_remove_and_clear() {
    let storage = SqliteQueueStorage::open_in_memory().unwrap();
    let id = storage.append(Method::Put, "/clients/5/", Some("{}")).unwrap();
    storage.append(Method::Post, "/orders/", Some("{}")).unwrap();

    assert!(storage.remove(id).unwrap());
    assert!(!storage.remove(id).unwrap());
    assert_eq!(storage.clear().unwrap(), 1);
    assert!(storage.list().unwrap().is_empty());
  }

  #[test]
  fn test_survives_reopen() {
    let dir = std::env::temp_dir().join(format!("courier-queue-{}", std::process::id()));
    let path = dir.join("offline.db");

    {
      let storage = SqliteQueueStorage::open(Some(&path)).unwrap();
      storage.append(Method::Put, "/clients/5/", Some("{}")).unwrap();
    }

    let storage = SqliteQueueStorage::open(Some(&path)).unwrap();
    assert_eq!(storage.list().unwrap().len(), 1);

    drop(storage);
    let _ = std::fs::remove_dir_all(&dir);
  }
}
