//! Session collaborators: token provider and login navigation.

use std::sync::RwLock;
use tracing::info;

/// Supplies the bearer token for outgoing requests and owns local session state.
pub trait SessionStore: Send + Sync {
  /// Current token, if signed in.
  fn token(&self) -> Option<String>;

  /// Forget all local session state.
  fn clear(&self);
}

/// Session held in memory, optionally seeded from the environment.
#[derive(Debug, Default)]
pub struct MemorySession {
  token: RwLock<Option<String>>,
}

impl MemorySession {
  pub fn new(token: Option<String>) -> Self {
    Self {
      token: RwLock::new(token),
    }
  }

  pub fn set_token(&self, token: impl Into<String>) {
    *self.token.write().unwrap_or_else(|e| e.into_inner()) = Some(token.into());
  }
}

impl SessionStore for MemorySession {
  fn token(&self) -> Option<String> {
    self.token.read().unwrap_or_else(|e| e.into_inner()).clone()
  }

  fn clear(&self) {
    *self.token.write().unwrap_or_else(|e| e.into_inner()) = None;
  }
}

/// Moves the user to the login page after a session expiry.
pub trait Navigator: Send + Sync {
  fn redirect_to_login(&self, login_page: &str);
}

/// Navigator for headless use: records the redirect in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
  fn redirect_to_login(&self, login_page: &str) {
    info!(page = login_page, "session expired, redirecting to login");
  }
}
