//! Online/offline signal.

use std::sync::atomic::{AtomicBool, Ordering};

pub trait ConnectivityProbe: Send + Sync {
  fn is_online(&self) -> bool;
}

/// Connectivity switched by the host application.
#[derive(Debug)]
pub struct ConnectivityFlag {
  online: AtomicBool,
}

impl ConnectivityFlag {
  pub fn new(online: bool) -> Self {
    Self {
      online: AtomicBool::new(online),
    }
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }
}

impl Default for ConnectivityFlag {
  fn default() -> Self {
    Self::new(true)
  }
}

impl ConnectivityProbe for ConnectivityFlag {
  fn is_online(&self) -> bool {
    self.online.load(Ordering::SeqCst)
  }
}
