//! Per-endpoint TTL overrides.

use regex::Regex;
use std::time::Duration;

use crate::error::{ApiError, ApiResult};

/// Default TTL when no policy matches.
pub const DEFAULT_TTL: Duration = Duration::from_secs(120);

/// Built-in policies, evaluated after any configured ones.
const BUILTIN_POLICIES: &[(&str, u64)] = &[
  // Aggregates are expensive to compute and tolerate staleness
  (r"/(analytics|dashboard|stats|reports)/", 300),
  // Near-static catalogues
  (r"/(categories|metal-types|stone-types|settings|lookups)/", 1800),
  // Paginated lists churn as records are added
  (r"[?&]page=", 30),
];

/// A single `pattern -> ttl` override.
#[derive(Debug, Clone)]
pub struct EndpointPolicy {
  matcher: Regex,
  ttl: Duration,
}

impl EndpointPolicy {
  pub fn new(pattern: &str, ttl: Duration) -> ApiResult<Self> {
    let matcher = Regex::new(pattern)
      .map_err(|e| ApiError::Config(format!("Invalid cache policy pattern '{}': {}", pattern, e)))?;
    Ok(Self { matcher, ttl })
  }

  pub fn matches(&self, endpoint: &str) -> bool {
    self.matcher.is_match(endpoint)
  }

  pub fn ttl(&self) -> Duration {
    self.ttl
  }
}

/// Ordered policy list; the first matching pattern wins.
#[derive(Debug, Clone)]
pub struct PolicyTable {
  policies: Vec<EndpointPolicy>,
  default_ttl: Duration,
}

impl PolicyTable {
  /// Table with only the given policies and default TTL.
  pub fn new(policies: Vec<EndpointPolicy>, default_ttl: Duration) -> Self {
    Self {
      policies,
      default_ttl,
    }
  }

  /// Built-in table, with `overrides` consulted first.
  pub fn with_builtin(overrides: Vec<EndpointPolicy>, default_ttl: Duration) -> Self {
    let mut policies = overrides;
    policies.extend(BUILTIN_POLICIES.iter().filter_map(|(pattern, secs)| {
      EndpointPolicy::new(pattern, Duration::from_secs(*secs)).ok()
    }));
    Self::new(policies, default_ttl)
  }

  pub fn resolve_ttl(&self, endpoint: &str) -> Duration {
    self
      .policies
      .iter()
      .find(|p| p.matches(endpoint))
      .map(EndpointPolicy::ttl)
      .unwrap_or(self.default_ttl)
  }

  pub fn default_ttl(&self) -> Duration {
    self.default_ttl
  }
}

impl Default for PolicyTable {
  fn default() -> Self {
    Self::with_builtin(Vec::new(), DEFAULT_TTL)
  }
}
