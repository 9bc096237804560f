//! Error taxonomy for the request layer.

use serde_json::Value;
use thiserror::Error;

/// Failure surfaced by the request layer.
///
/// `Clone` because a single settlement is shared by every caller that joined
/// a deduplicated request.
#[derive(Error, Debug, Clone)]
pub enum ApiError {
  /// The attempt did not complete within the per-call timeout
  #[error("The server took too long to respond. Please try again.")]
  Timeout(u64),

  /// The transport could not reach the backend
  #[error("{0}")]
  Network(String),

  /// Non-2xx response that is not handled specially
  #[error("{message}")]
  Http { status: u16, message: String },

  /// Field-level validation failures (HTTP 400 with a structured body)
  #[error("Validation failed")]
  Validation(Value),

  /// 401 on a non-login endpoint; session state has been cleared
  #[error("Your session has expired. Please sign in again.")]
  SessionExpired,

  /// Local persistence failure (offline queue)
  #[error("Storage error: {0}")]
  Storage(String),

  /// Invalid endpoint or client configuration
  #[error("Configuration error: {0}")]
  Config(String),
}

impl ApiError {
  /// Whether another attempt may succeed.
  ///
  /// Timeouts, network failures and HTTP 500/503 are transient; everything
  /// else is permanent.
  pub fn is_transient(&self) -> bool {
    match self {
      ApiError::Timeout(_) | ApiError::Network(_) => true,
      ApiError::Http { status, .. } => matches!(status, 500 | 503),
      _ => false,
    }
  }

  /// HTTP status carried by the error, if any.
  pub fn status(&self) -> Option<u16> {
    match self {
      ApiError::Http { status, .. } => Some(*status),
      ApiError::Validation(_) => Some(400),
      ApiError::SessionExpired => Some(401),
      _ => None,
    }
  }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Pull a human-readable message out of an error body.
///
/// Checks `error`, `message`, `detail`, then the first entry of `messages`.
pub fn extract_message(body: &Value) -> Option<String> {
  for field in ["error", "message", "detail"] {
    if let Some(text) = body.get(field).and_then(value_as_text) {
      return Some(text);
    }
  }

  body
    .get("messages")
    .and_then(Value::as_array)
    .and_then(|messages| messages.first())
    .and_then(value_as_text)
}

fn value_as_text(value: &Value) -> Option<String> {
  match value {
    Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
    // Some backends nest the message, e.g. {"message": {"message": "..."}}
    Value::Object(_) => value.get("message").and_then(value_as_text),
    _ => None,
  }
}

/// Shown for any attempt that exceeded the per-call timeout.
pub const TIMEOUT_MESSAGE: &str = "The server took too long to respond. Please try again.";

const NETWORK_PHRASES: &[&str] = &[
  "network error",
  "network request failed",
  "failed to fetch",
  "error sending request",
  "connection refused",
  "connection reset",
  "connection closed",
];

const UNAUTHORIZED_PHRASES: &[&str] = &["unauthorized", "status 401"];

const SERVER_ERROR_PHRASES: &[&str] = &["internal server error", "server error", "status 500"];

/// Map technical failure text to user-facing phrasing.
///
/// Only transport and HTTP phrasing is recognized, so backend messages that
/// happen to contain a number or the word "connection" pass through.
/// Anything unrecognized is returned unchanged.
pub fn humanize(message: &str) -> String {
  let lower = message.to_lowercase();
  let mentions = |phrases: &[&str]| phrases.iter().any(|p| lower.contains(p));

  if lower.contains("timed out") || lower.contains("operation timeout") {
    TIMEOUT_MESSAGE.to_string()
  } else if mentions(NETWORK_PHRASES) {
    "Unable to reach the server. Check your connection and try again.".to_string()
  } else if mentions(UNAUTHORIZED_PHRASES) {
    "You are not authorized to perform this action.".to_string()
  } else if mentions(SERVER_ERROR_PHRASES) {
    "The server encountered an error. Please try again later.".to_string()
  } else {
    message.to_string()
  }
}
