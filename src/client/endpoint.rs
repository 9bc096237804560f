//! Endpoint to URL mapping and global query filters.

use std::collections::BTreeMap;
use std::sync::RwLock;
use url::Url;

use crate::error::{ApiError, ApiResult};

/// Resolves logical endpoints against the configured base URL.
///
/// Global filters (e.g. the selected date range) are merged into the query
/// string of every read request.
#[derive(Debug)]
pub struct UrlBuilder {
  base: Url,
  filters: RwLock<BTreeMap<String, String>>,
}

impl UrlBuilder {
  pub fn new(base_url: &str) -> ApiResult<Self> {
    let mut base = Url::parse(base_url)
      .map_err(|e| ApiError::Config(format!("Invalid base URL '{}': {}", base_url, e)))?;

    // Url::join drops the last path segment unless the base ends with '/'
    if !base.path().ends_with('/') {
      let path = format!("{}/", base.path());
      base.set_path(&path);
    }

    Ok(Self {
      base,
      filters: RwLock::new(BTreeMap::new()),
    })
  }

  pub fn with_filters(self, filters: BTreeMap<String, String>) -> Self {
    *self.filters.write().unwrap_or_else(|e| e.into_inner()) = filters;
    self
  }

  pub fn set_filter(&self, name: impl Into<String>, value: impl Into<String>) {
    self
      .filters
      .write()
      .unwrap_or_else(|e| e.into_inner())
      .insert(name.into(), value.into());
  }

  pub fn clear_filter(&self, name: &str) {
    self
      .filters
      .write()
      .unwrap_or_else(|e| e.into_inner())
      .remove(name);
  }

  pub fn filters(&self) -> BTreeMap<String, String> {
    self.filters.read().unwrap_or_else(|e| e.into_inner()).clone()
  }

  /// Endpoint with global filters appended, unless the endpoint already
  /// sets that parameter.
  ///
  /// The result is what read requests are keyed and cached under.
  pub fn with_global_filters(&self, endpoint: &str) -> String {
    let filters = self.filters();
    let mut result = endpoint.to_string();

    for (name, value) in &filters {
      if has_param(&result, name) {
        continue;
      }
      let separator = if result.contains('?') { '&' } else { '?' };
      result.push(separator);
      result.push_str(&url::form_urlencoded::Serializer::new(String::new())
        .append_pair(name, value)
        .finish());
    }

    result
  }

  /// Fully qualified URL for an endpoint.
  pub fn resolve(&self, endpoint: &str) -> ApiResult<Url> {
    self
      .base
      .join(endpoint.trim_start_matches('/'))
      .map_err(|e| ApiError::Config(format!("Invalid endpoint '{}': {}", endpoint, e)))
  }
}

fn has_param(endpoint: &str, name: &str) -> bool {
  endpoint
    .split_once('?')
    .map(|(_, query)| {
      url::form_urlencoded::parse(query.as_bytes()).any(|(key, _)| key == name)
    })
    .unwrap_or(false)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_resolve_against_base_path() {
    let builder = UrlBuilder::new("https://api.example.com/api").unwrap();
    let url = builder.resolve("/clients/5/").unwrap();
    assert_eq!(url.as_str(), "https://api.example.com/api/clients/5/");
  }

  #[test]
  fn test_global_filters_merge() {
    let builder = UrlBuilder::new("https://api.example.com/").unwrap();
    builder.set_filter("date_from", "2024-01-01");
    builder.set_filter("date_to", "2024-01-31");

    assert_eq!(
      builder.with_global_filters("/sales/"),
      "/sales/?date_from=2024-01-01&date_to=2024-01-31"
    );
    assert_eq!(
      builder.with_global_filters("/sales/?page=2&date_to=2024-02-01"),
      "/sales/?page=2&date_to=2024-02-01&date_from=2024-01-01"
    );

    builder.clear_filter("date_from");
    builder.clear_filter("date_to");
    assert_eq!(builder.with_global_filters("/sales/"), "/sales/");
  }

  #[test]
  fn test_invalid_base() {
    assert!(UrlBuilder::new("not a url").is_err());
  }
}
