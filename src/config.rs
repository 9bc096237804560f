use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::EndpointPolicy;
use crate::client::{ApiClientBuilder, ExecutorSettings, MemorySession};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub request: RequestConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub offline: OfflineConfig,
  /// Query parameters merged into every read (e.g. a selected date range)
  #[serde(default)]
  pub filters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  pub base_url: String,
  #[serde(default = "default_login_endpoint")]
  pub login_endpoint: String,
  /// Page the user is sent to when the session expires
  #[serde(default = "default_login_page")]
  pub login_page: String,
}

fn default_login_endpoint() -> String {
  "/auth/login/".to_string()
}

fn default_login_page() -> String {
  "/login".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
  pub timeout_secs: u64,
  pub max_retries: u32,
  pub retry_base_delay_ms: u64,
  pub dedup_window_ms: u64,
  pub session_redirect_delay_ms: u64,
}

impl Default for RequestConfig {
  fn default() -> Self {
    Self {
      timeout_secs: 30,
      max_retries: 3,
      retry_base_delay_ms: 1000,
      dedup_window_ms: 1000,
      session_redirect_delay_ms: 1200,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub default_ttl_secs: u64,
  /// Evaluated in order, before the built-in policies
  pub policies: Vec<PolicyConfig>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      default_ttl_secs: 120,
      policies: Vec::new(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
  pub pattern: String,
  pub ttl_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OfflineConfig {
  /// SQLite file for the offline queue (default: $XDG_DATA_HOME/courier/offline.db)
  pub queue_path: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./courier.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/courier/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/courier/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("courier.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("courier").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Get the API token from environment variables.
  ///
  /// Checks COURIER_API_TOKEN first, then API_TOKEN as fallback. A missing
  /// token is not an error: requests simply go out unauthenticated.
  pub fn get_api_token() -> Option<String> {
    std::env::var("COURIER_API_TOKEN")
      .or_else(|_| std::env::var("API_TOKEN"))
      .ok()
      .filter(|t| !t.is_empty())
  }

  pub fn executor_settings(&self) -> ExecutorSettings {
    ExecutorSettings {
      timeout: Duration::from_secs(self.request.timeout_secs),
      max_retries: self.request.max_retries,
      retry_base_delay: Duration::from_millis(self.request.retry_base_delay_ms),
      session_redirect_delay: Duration::from_millis(self.request.session_redirect_delay_ms),
      login_endpoint: self.api.login_endpoint.clone(),
      login_page: self.api.login_page.clone(),
    }
  }

  pub fn policies(&self) -> Result<Vec<EndpointPolicy>> {
    self
      .cache
      .policies
      .iter()
      .map(|p| {
        EndpointPolicy::new(&p.pattern, Duration::from_secs(p.ttl_secs)).map_err(|e| eyre!("{}", e))
      })
      .collect()
  }

  /// Client builder wired with everything this config describes.
  pub fn client_builder(&self) -> Result<ApiClientBuilder> {
    let mut builder = ApiClientBuilder::new(self.api.base_url.clone())
      .settings(self.executor_settings())
      .policies(self.policies()?)
      .default_ttl(Duration::from_secs(self.cache.default_ttl_secs))
      .dedup_window(Duration::from_millis(self.request.dedup_window_ms))
      .filters(self.filters.clone())
      .session(Arc::new(MemorySession::new(Self::get_api_token())));

    if let Some(path) = &self.offline.queue_path {
      builder = builder.queue_path(path);
    }

    Ok(builder)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::from_yaml("api:\n  base_url: https://api.example.com/\n").unwrap();

    assert_eq!(config.api.login_endpoint, "/auth/login/");
    assert_eq!(config.request.timeout_secs, 30);
    assert_eq!(config.request.max_retries, 3);
    assert_eq!(config.cache.default_ttl_secs, 120);
    assert!(config.filters.is_empty());

    let settings = config.executor_settings();
    assert_eq!(settings.retry_base_delay, Duration::from_secs(1));
    assert_eq!(settings.session_redirect_delay, Duration::from_millis(1200));
  }

  #[test]
  fn test_full_config() {
    let yaml = r#"
api:
  base_url: https://api.example.com/api/
  login_endpoint: /token/
request:
  timeout_secs: 10
  max_retries: 1
cache:
  default_ttl_secs: 60
  policies:
    - pattern: "/reports/"
      ttl_secs: 600
filters:
  date_from: "2024-01-01"
"#;
    let config = Config::from_yaml(yaml).unwrap();

    assert_eq!(config.api.login_endpoint, "/token/");
    assert_eq!(config.request.timeout_secs, 10);
    // Unset keys in a present section keep their defaults
    assert_eq!(config.request.dedup_window_ms, 1000);
    assert_eq!(config.policies().unwrap()[0].ttl(), Duration::from_secs(600));
    assert_eq!(config.filters["date_from"], "2024-01-01");
  }

  #[test]
  fn test_bad_policy_pattern() {
    let yaml = r#"
api:
  base_url: https://api.example.com/
cache:
  policies:
    - pattern: "(oops"
      ttl_secs: 5
"#;
    let config = Config::from_yaml(yaml).unwrap();
    assert!(config.policies().is_err());
  }

  #[test]
  fn test_missing_explicit_path() {
    assert!(Config::load(Some(Path::new("/nonexistent/courier.yaml"))).is_err());
  }
}
