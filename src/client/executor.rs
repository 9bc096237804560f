//! Timeout-bounded network attempts with retry and status handling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::endpoint::UrlBuilder;
use super::envelope::{decode_error_body, decode_success, ApiResponse, Envelope};
use super::session::{Navigator, SessionStore};
use super::transport::{Transport, TransportRequest, TransportResponse};
use crate::cache::{CacheKey, CacheStore};
use crate::error::{extract_message, humanize, ApiError, ApiResult};
use crate::event::{ClientEvent, EventHandler};

/// Tunables for the executor.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
  /// Hard limit per attempt
  pub timeout: Duration,
  /// Additional attempts after the first for transient failures
  pub max_retries: u32,
  /// Backoff base; the n-th retry waits `base * 2^n`
  pub retry_base_delay: Duration,
  /// Grace period between a session-expired broadcast and the redirect
  pub session_redirect_delay: Duration,
  /// Endpoint that never carries a token and whose 401 is a plain error
  pub login_endpoint: String,
  /// Where to send the user after a session expires
  pub login_page: String,
}

impl Default for ExecutorSettings {
  fn default() -> Self {
    Self {
      timeout: Duration::from_secs(30),
      max_retries: 3,
      retry_base_delay: Duration::from_secs(1),
      session_redirect_delay: Duration::from_millis(1200),
      login_endpoint: "/auth/login/".to_string(),
      login_page: "/login".to_string(),
    }
  }
}

/// Delay before retry number `retry` (zero-based).
pub fn backoff_delay(base: Duration, retry: u32) -> Duration {
  base.saturating_mul(2u32.saturating_pow(retry))
}

/// Performs network calls for the facade.
pub struct Executor {
  transport: Arc<dyn Transport>,
  urls: Arc<UrlBuilder>,
  session: Arc<dyn SessionStore>,
  navigator: Arc<dyn Navigator>,
  cache: Arc<CacheStore<ApiResponse>>,
  events: EventHandler,
  settings: ExecutorSettings,
  redirect_pending: Arc<AtomicBool>,
}

impl Executor {
  pub fn new(
    transport: Arc<dyn Transport>,
    urls: Arc<UrlBuilder>,
    session: Arc<dyn SessionStore>,
    navigator: Arc<dyn Navigator>,
    cache: Arc<CacheStore<ApiResponse>>,
    events: EventHandler,
    settings: ExecutorSettings,
  ) -> Self {
    Self {
      transport,
      urls,
      session,
      navigator,
      cache,
      events,
      settings,
      redirect_pending: Arc::new(AtomicBool::new(false)),
    }
  }

  pub fn settings(&self) -> &ExecutorSettings {
    &self.settings
  }

  /// Run the request described by `key`, retrying transient failures.
  ///
  /// Successful GET envelopes are written to the cache with the endpoint's
  /// TTL. A 400 with a structured body comes back as a `success: false`
  /// envelope instead of an error.
  pub async fn execute(&self, key: &CacheKey, body: Option<String>) -> ApiResult<ApiResponse> {
    let url = self.urls.resolve(key.endpoint())?;
    let mut retry = 0;

    loop {
      let request = self.build_request(key, url.clone(), body.clone());

      let outcome = match tokio::time::timeout(self.settings.timeout, self.transport.send(request)).await {
        Ok(Ok(response)) => self.handle_response(key, response),
        Ok(Err(e)) => Err(e),
        // Dropping the send future aborts the in-flight call
        Err(_) => Err(ApiError::Timeout(self.settings.timeout.as_secs())),
      };

      match outcome {
        Ok(response) => {
          if key.method().is_read() && response.is_success() {
            self.cache.store(key, response.clone(), None);
          }
          return Ok(response);
        }
        Err(e) if e.is_transient() && retry < self.settings.max_retries => {
          let delay = backoff_delay(self.settings.retry_base_delay, retry);
          debug!(
            key = %key,
            error = %e,
            retry = retry + 1,
            delay_ms = delay.as_millis() as u64,
            "retrying request"
          );
          tokio::time::sleep(delay).await;
          retry += 1;
        }
        Err(e) => {
          if e.is_transient() {
            warn!(key = %key, error = %e, attempts = retry + 1, "request failed after retries");
          }
          return Err(surface(e));
        }
      }
    }
  }

  fn is_login(&self, endpoint: &str) -> bool {
    let path = endpoint.split('?').next().unwrap_or(endpoint);
    path.starts_with(&self.settings.login_endpoint)
  }

  fn build_request(&self, key: &CacheKey, url: url::Url, body: Option<String>) -> TransportRequest {
    let mut headers = vec![("Accept".to_string(), "application/json".to_string())];

    if body.is_some() {
      headers.push(("Content-Type".to_string(), "application/json".to_string()));
    }

    if !self.is_login(key.endpoint()) {
      if let Some(token) = self.session.token() {
        headers.push(("Authorization".to_string(), format!("Bearer {}", token)));
      }
    }

    TransportRequest {
      method: key.method(),
      url,
      headers,
      body,
    }
  }

  fn handle_response(&self, key: &CacheKey, response: TransportResponse) -> ApiResult<ApiResponse> {
    if response.is_success() {
      return Ok(decode_success(
        response.header("content-type"),
        response.header("content-disposition"),
        &response.body,
      ));
    }

    let error_body = decode_error_body(&response.body);

    match response.status {
      400 => {
        if let Some(errors) = error_body {
          return Ok(ApiResponse::Envelope(Envelope::validation(errors)));
        }
      }
      401 if !self.is_login(key.endpoint()) => {
        self.expire_session(key.endpoint());
        return Err(ApiError::SessionExpired);
      }
      _ => {}
    }

    let message = error_body
      .as_ref()
      .and_then(extract_message)
      .unwrap_or_else(|| format!("Request failed with status {}", response.status));

    Err(ApiError::Http {
      status: response.status,
      message: humanize(&message),
    })
  }

  /// Broadcast the expiry, clear local session state, and redirect once the
  /// grace period has passed.
  fn expire_session(&self, endpoint: &str) {
    warn!(endpoint, "session expired");
    self.events.send(ClientEvent::SessionExpired {
      endpoint: endpoint.to_string(),
    });
    self.session.clear();

    // Concurrent 401s share one redirect
    if self.redirect_pending.swap(true, Ordering::SeqCst) {
      return;
    }

    let navigator = Arc::clone(&self.navigator);
    let pending = Arc::clone(&self.redirect_pending);
    let delay = self.settings.session_redirect_delay;
    let page = self.settings.login_page.clone();
    tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      info!(page = %page, "redirecting to login");
      navigator.redirect_to_login(&page);
      pending.store(false, Ordering::SeqCst);
    });
  }
}

/// Final shape of an error handed to callers.
///
/// Every surfaced error displays user-facing text: transport messages are
/// humanized here, `Http` messages in `handle_response`, and `Timeout`,
/// `SessionExpired` and `Validation` carry fixed phrasing.
fn surface(error: ApiError) -> ApiError {
  match error {
    ApiError::Network(message) => ApiError::Network(humanize(&message)),
    other => other,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::Method;
  use crate::client::session::MemorySession;
  use crate::client::testing::{RecordingNavigator, ScriptedTransport, Step};
  use crate::error::TIMEOUT_MESSAGE;
  use serde_json::json;
  use tokio::time::Instant;

  struct Harness {
    executor: Executor,
    transport: Arc<ScriptedTransport>,
    session: Arc<MemorySession>,
    navigator: Arc<RecordingNavigator>,
    cache: Arc<CacheStore<ApiResponse>>,
    events: EventHandler,
  }

  fn harness(steps: Vec<Step>) -> Harness {
    let transport = ScriptedTransport::new(steps);
    let session = Arc::new(MemorySession::new(Some("secret".into())));
    let navigator = Arc::new(RecordingNavigator::default());
    let cache = Arc::new(CacheStore::default());
    let events = EventHandler::default();

    let executor = Executor::new(
      transport.clone(),
      Arc::new(UrlBuilder::new("https://api.example.com/api/").unwrap()),
      session.clone(),
      navigator.clone(),
      Arc::clone(&cache),
      events.clone(),
      ExecutorSettings::default(),
    );

    Harness {
      executor,
      transport,
      session,
      navigator,
      cache,
      events,
    }
  }

  fn get(endpoint: &str) -> CacheKey {
    CacheKey::new(Method::Get, endpoint, None)
  }

  #[test]
  fn test_backoff_delay() {
    let base = Duration::from_secs(1);
    assert_eq!(backoff_delay(base, 0), Duration::from_secs(1));
    assert_eq!(backoff_delay(base, 1), Duration::from_secs(2));
    assert_eq!(backoff_delay(base, 2), Duration::from_secs(4));
  }

  #[tokio::test(start_paused = true)]
  async fn test_success_is_cached_for_get() {
    let h = harness(vec![Step::json(200, json!([{"id": 1}]))]);

    let response = h.executor.execute(&get("/clients/"), None).await.unwrap();
    assert_eq!(response.envelope().unwrap().data, json!([{"id": 1}]));
    assert_eq!(h.cache.lookup(&get("/clients/")), Some(response));
    assert_eq!(h.transport.attempts(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_writes_are_not_cached() {
    let h = harness(vec![Step::json(201, json!({"id": 2}))]);
    let key = CacheKey::new(Method::Post, "/clients/", Some(r#"{"name":"Ada"}"#));

    h.executor
      .execute(&key, Some(r#"{"name":"Ada"}"#.into()))
      .await
      .unwrap();
    assert!(h.cache.is_empty());

    let request = &h.transport.requests()[0];
    assert_eq!(request.body.as_deref(), Some(r#"{"name":"Ada"}"#));
    assert!(request
      .headers
      .iter()
      .any(|(k, v)| k == "Content-Type" && v == "application/json"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_retry_bound_and_backoff() {
    let h = harness(vec![Step::network()]);
    let started = Instant::now();

    let err = h.executor.execute(&get("/clients/"), None).await.unwrap_err();

    assert!(matches!(err, ApiError::Network(ref m) if m.contains("reach the server")));
    assert_eq!(h.transport.attempts(), 4);
    assert_eq!(
      h.transport.gaps(),
      vec![
        Duration::from_secs(1),
        Duration::from_secs(2),
        Duration::from_secs(4)
      ]
    );
    assert_eq!(started.elapsed(), Duration::from_secs(7));
  }

  #[tokio::test(start_paused = true)]
  async fn test_timeouts_are_retried_then_thrown() {
    let h = harness(vec![Step::Hang]);
    let started = Instant::now();

    let err = h.executor.execute(&get("/clients/"), None).await.unwrap_err();

    assert!(matches!(err, ApiError::Timeout(30)));
    assert_eq!(err.to_string(), TIMEOUT_MESSAGE);
    assert_eq!(h.transport.attempts(), 4);
    assert_eq!(started.elapsed(), Duration::from_secs(4 * 30 + 7));
  }

  #[tokio::test(start_paused = true)]
  async fn test_server_error_then_success() {
    let h = harness(vec![
      Step::status(503),
      Step::status(500),
      Step::json(200, json!({"ok": true})),
    ]);

    let response = h.executor.execute(&get("/clients/"), None).await.unwrap();
    assert!(response.is_success());
    assert_eq!(h.transport.attempts(), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_client_errors_are_not_retried() {
    let h = harness(vec![Step::json(404, json!({"detail": "Not found."}))]);

    let err = h.executor.execute(&get("/clients/9/"), None).await.unwrap_err();

    match err {
      ApiError::Http { status, message } => {
        assert_eq!(status, 404);
        assert_eq!(message, "Not found.");
      }
      other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(h.transport.attempts(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_error_message_is_humanized() {
    let h = harness(vec![Step::json(502, json!({"error": "Internal Server Error"}))]);

    let err = h.executor.execute(&get("/clients/"), None).await.unwrap_err();
    assert!(err.to_string().contains("server encountered an error"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_validation_errors_are_returned_inline() {
    let errors = json!({"email": ["Enter a valid email address."]});
    let h = harness(vec![Step::json(400, errors.clone())]);
    let key = CacheKey::new(Method::Post, "/clients/", Some("{}"));

    let response = h.executor.execute(&key, Some("{}".into())).await.unwrap();
    let envelope = response.into_envelope();

    assert!(!envelope.success);
    assert_eq!(envelope.errors, Some(errors));
    assert_eq!(h.transport.attempts(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_unauthorized_expires_session() {
    let h = harness(vec![Step::status(401)]);
    let mut rx = h.events.subscribe();

    let err = h.executor.execute(&get("/clients/"), None).await.unwrap_err();

    assert!(matches!(err, ApiError::SessionExpired));
    assert_eq!(
      rx.try_recv().unwrap(),
      ClientEvent::SessionExpired {
        endpoint: "/clients/".into()
      }
    );
    assert_eq!(h.session.token(), None);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(h.navigator.redirects().is_empty());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.navigator.redirects(), vec!["/login"]);
  }

  #[tokio::test(start_paused = true)]
  async fn test_login_endpoint_unauthorized_is_plain_error() {
    let h = harness(vec![Step::json(401, json!({"detail": "Invalid credentials"}))]);
    let mut rx = h.events.subscribe();
    let key = CacheKey::new(Method::Post, "/auth/login/", Some("{}"));

    let err = h.executor.execute(&key, Some("{}".into())).await.unwrap_err();

    assert!(matches!(err, ApiError::Http { status: 401, .. }));
    assert!(rx.try_recv().is_err());
    assert_eq!(h.session.token().as_deref(), Some("secret"));

    // Login requests never carry the token
    let request = &h.transport.requests()[0];
    assert!(!request.headers.iter().any(|(k, _)| k == "Authorization"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_token_header() {
    let h = harness(vec![Step::json(200, json!([]))]);
    h.executor.execute(&get("/clients/"), None).await.unwrap();

    let request = &h.transport.requests()[0];
    assert!(request
      .headers
      .iter()
      .any(|(k, v)| k == "Authorization" && v == "Bearer secret"));
    assert_eq!(request.url.as_str(), "https://api.example.com/api/clients/");
  }
}
