//! Offline write buffering.
//!
//! Writes issued while the connectivity probe reports offline are appended
//! to a durable SQLite queue instead of hitting the network. Draining the
//! queue once back online is left to the host application.

mod connectivity;
mod queue;
mod storage;

pub use connectivity::{ConnectivityFlag, ConnectivityProbe};
pub use queue::OfflineQueue;
pub use storage::{QueueStorage, QueuedWriteOp, SqliteQueueStorage};
