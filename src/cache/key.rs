//! Cache key derivation.

use sha2::{Digest, Sha256};
use std::fmt;

/// HTTP verbs supported by the request layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
  Get,
  Post,
  Put,
  Delete,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Delete => "DELETE",
    }
  }

  pub fn is_read(&self) -> bool {
    matches!(self, Method::Get)
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl std::str::FromStr for Method {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_uppercase().as_str() {
      "GET" => Ok(Method::Get),
      "POST" => Ok(Method::Post),
      "PUT" => Ok(Method::Put),
      "DELETE" => Ok(Method::Delete),
      other => Err(format!("Unsupported method: {}", other)),
    }
  }
}

/// Deterministic identity of a cacheable, dedupeable unit of work.
///
/// Rendered as `METHOD:endpoint` with a `#digest` suffix when a body is
/// present. The endpoint stays readable so invalidation patterns can match
/// it by substring; the body is hashed for a stable, fixed-length suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  method: Method,
  endpoint: String,
  rendered: String,
}

impl CacheKey {
  pub fn new(method: Method, endpoint: &str, body: Option<&str>) -> Self {
    let rendered = match body {
      Some(body) if !body.is_empty() => {
        format!("{}:{}#{}", method, endpoint, body_digest(body))
      }
      _ => format!("{}:{}", method, endpoint),
    };

    Self {
      method,
      endpoint: endpoint.to_string(),
      rendered,
    }
  }

  pub fn method(&self) -> Method {
    self.method
  }

  /// Endpoint (path plus query) the key was derived from.
  pub fn endpoint(&self) -> &str {
    &self.endpoint
  }

  pub fn as_str(&self) -> &str {
    &self.rendered
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.rendered)
  }
}

fn body_digest(body: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(body.as_bytes());
  // 16 hex chars is plenty to tell request bodies apart
  hex::encode(&hasher.finalize()[..8])
}
