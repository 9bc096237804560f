//! Declarative description of a write and what it makes stale.

use serde_json::Value;

use crate::bus::MutationType;
use crate::cache::Method;

/// A write plus the cache patterns it invalidates and the event it emits.
///
/// Patterns are listed explicitly per operation; they are key substrings
/// such as `"/clients/"` or `"/audit-logs/"`.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
  pub method: Method,
  pub endpoint: String,
  pub body: Option<Value>,
  pub mutation: MutationType,
  pub invalidates: Vec<String>,
}

impl Mutation {
  fn new(method: Method, mutation: MutationType, endpoint: impl Into<String>) -> Self {
    Self {
      method,
      endpoint: endpoint.into(),
      body: None,
      mutation,
      invalidates: Vec::new(),
    }
  }

  /// `POST` emitting `entity:created`.
  pub fn create(entity: &str, endpoint: impl Into<String>) -> Self {
    Self::new(Method::Post, MutationType::created(entity), endpoint)
  }

  /// `PUT` emitting `entity:updated`.
  pub fn update(entity: &str, endpoint: impl Into<String>) -> Self {
    Self::new(Method::Put, MutationType::updated(entity), endpoint)
  }

  /// `DELETE` emitting `entity:deleted`.
  pub fn delete(entity: &str, endpoint: impl Into<String>) -> Self {
    Self::new(Method::Delete, MutationType::deleted(entity), endpoint)
  }

  pub fn body(mut self, body: Value) -> Self {
    self.body = Some(body);
    self
  }

  pub fn invalidates<I, S>(mut self, patterns: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.invalidates.extend(patterns.into_iter().map(Into::into));
    self
  }
}
