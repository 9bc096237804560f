//! Request facade: the public `get`/`post`/`put`/`delete` surface.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use super::endpoint::UrlBuilder;
use super::envelope::{ApiResponse, Envelope};
use super::executor::{Executor, ExecutorSettings};
use super::mutation::Mutation;
use super::observer::{PerformanceObserver, TracingObserver};
use super::session::{LogNavigator, MemorySession, Navigator, SessionStore};
use super::transport::{ReqwestTransport, Transport};
use crate::bus::{Bus, MutationEvent, MutationType, Subscription};
use crate::cache::{CacheKey, CacheSource, CacheStore, EndpointPolicy, Method, PolicyTable, DEFAULT_TTL};
use crate::dedup::{Deduplicator, DEDUP_WINDOW};
use crate::error::{ApiError, ApiResult};
use crate::event::{ClientEvent, EventHandler};
use crate::offline::{ConnectivityFlag, ConnectivityProbe, OfflineQueue, QueueStorage, SqliteQueueStorage};

/// Shared state behind every clone of an [`ApiClient`].
///
/// Construct one client per process and clone it; clones share the cache,
/// pending-request table, listener registries and offline queue.
struct Inner {
  cache: Arc<CacheStore<ApiResponse>>,
  dedup: Deduplicator<ApiResponse>,
  executor: Executor,
  bus: Bus,
  queue: OfflineQueue,
  urls: Arc<UrlBuilder>,
  observer: Arc<dyn PerformanceObserver>,
  events: EventHandler,
}

/// HTTP client with caching, deduplication, retries and offline writes.
#[derive(Clone)]
pub struct ApiClient {
  inner: Arc<Inner>,
}

impl ApiClient {
  pub fn builder(base_url: impl Into<String>) -> ApiClientBuilder {
    ApiClientBuilder::new(base_url)
  }

  /// Cached, deduplicated read.
  ///
  /// Global filters are merged into the query string first, so they are
  /// part of the cache key.
  pub async fn get(&self, endpoint: &str) -> ApiResult<ApiResponse> {
    let endpoint = self.inner.urls.with_global_filters(endpoint);
    let key = CacheKey::new(Method::Get, &endpoint, None);
    let started = Instant::now();
    self.inner.observer.request_started(&key);

    let cached = self.inner.cache.lookup(&key);
    self.inner.observer.cache_lookup(&key, cached.is_some());
    if let Some(response) = cached {
      self.finish(&key, started, CacheSource::Cache, true);
      return Ok(response);
    }

    let inner = Arc::clone(&self.inner);
    let request_key = key.clone();
    let (result, joined) = self
      .inner
      .dedup
      .coalesce(&key, move || async move {
        inner.executor.execute(&request_key, None).await
      })
      .await;

    let source = if joined {
      CacheSource::Deduplicated
    } else {
      CacheSource::Network
    };
    self.finish(&key, started, source, result.is_ok());
    result
  }

  /// Read and decode `data` into `T`. Inline validation failures become errors.
  pub async fn get_as<T: DeserializeOwned>(&self, endpoint: &str) -> ApiResult<T> {
    self
      .get(endpoint)
      .await?
      .into_envelope()
      .into_result()?
      .data_as()
  }

  pub async fn post(&self, endpoint: &str, body: Option<&Value>) -> ApiResult<ApiResponse> {
    self.write(Method::Post, endpoint, body).await.map(|(r, _)| r)
  }

  pub async fn put(&self, endpoint: &str, body: Option<&Value>) -> ApiResult<ApiResponse> {
    self.write(Method::Put, endpoint, body).await.map(|(r, _)| r)
  }

  pub async fn delete(&self, endpoint: &str) -> ApiResult<ApiResponse> {
    self
      .write(Method::Delete, endpoint, None)
      .await
      .map(|(r, _)| r)
  }

  /// Dispatch on `method`.
  pub async fn request(
    &self,
    method: Method,
    endpoint: &str,
    body: Option<&Value>,
  ) -> ApiResult<ApiResponse> {
    match method {
      Method::Get => self.get(endpoint).await,
      _ => self.write(method, endpoint, body).await.map(|(r, _)| r),
    }
  }

  /// Perform a write; on success invalidate its patterns and emit its event.
  ///
  /// Writes buffered offline neither invalidate nor notify, since the
  /// backend has not seen them yet.
  pub async fn mutate(&self, mutation: Mutation) -> ApiResult<ApiResponse> {
    let (response, source) = self
      .write(mutation.method, &mutation.endpoint, mutation.body.as_ref())
      .await?;

    if source == CacheSource::Network && response.is_success() {
      self.inner.bus.invalidate(&mutation.invalidates);

      let payload = match response.envelope().map(|e| &e.data) {
        Some(data) if !data.is_null() => data.clone(),
        _ => mutation.body.clone().unwrap_or(Value::Null),
      };
      self.inner.bus.notify_mutation(mutation.mutation, payload);
    }

    Ok(response)
  }

  async fn write(
    &self,
    method: Method,
    endpoint: &str,
    body: Option<&Value>,
  ) -> ApiResult<(ApiResponse, CacheSource)> {
    let body = body
      .map(serde_json::to_string)
      .transpose()
      .map_err(|e| ApiError::Config(format!("Failed to serialize request body: {}", e)))?;
    let key = CacheKey::new(method, endpoint, body.as_deref());
    let started = Instant::now();
    self.inner.observer.request_started(&key);

    if self
      .inner
      .queue
      .enqueue_if_offline(method, endpoint, body.as_deref())
    {
      self.finish(&key, started, CacheSource::Offline, true);
      return Ok((ApiResponse::Envelope(Envelope::queued_offline()), CacheSource::Offline));
    }

    let result = self.inner.executor.execute(&key, body).await;
    self.finish(&key, started, CacheSource::Network, result.is_ok());
    result.map(|r| (r, CacheSource::Network))
  }

  fn finish(&self, key: &CacheKey, started: Instant, source: CacheSource, ok: bool) {
    self
      .inner
      .observer
      .request_finished(key, started.elapsed(), source, ok);
  }

  /// Evict every cached key containing any of `patterns`.
  pub fn invalidate<P: AsRef<str>>(&self, patterns: &[P]) -> Vec<String> {
    self.inner.bus.invalidate(patterns)
  }

  /// Drop cached reads after an out-of-band server-side change.
  pub fn force_refresh(&self, pattern: &str) -> Vec<String> {
    self.inner.bus.invalidate(&[pattern])
  }

  pub fn on_cache_invalidation<F>(&self, listener: F) -> Subscription
  where
    F: Fn(&[String]) -> color_eyre::Result<()> + Send + Sync + 'static,
  {
    self.inner.bus.on_invalidation(listener)
  }

  pub fn on_mutation<F>(&self, mutation: MutationType, listener: F) -> Subscription
  where
    F: Fn(&MutationEvent) -> color_eyre::Result<()> + Send + Sync + 'static,
  {
    self.inner.bus.on_mutation(mutation, listener)
  }

  pub fn notify_mutation(&self, mutation: MutationType, payload: Value) -> usize {
    self.inner.bus.notify_mutation(mutation, payload)
  }

  pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
    self.inner.events.subscribe()
  }

  pub fn offline_queue(&self) -> &OfflineQueue {
    &self.inner.queue
  }

  /// URL builder, for changing global filters at runtime.
  pub fn urls(&self) -> &UrlBuilder {
    &self.inner.urls
  }

  pub fn cache_size(&self) -> usize {
    self.inner.cache.len()
  }

  pub fn cache_keys(&self) -> Vec<String> {
    self.inner.cache.keys()
  }

  pub fn pending_requests(&self) -> usize {
    self.inner.dedup.len()
  }
}

/// Assembles an [`ApiClient`] from its collaborators.
///
/// Anything not supplied falls back to a default: `reqwest` transport,
/// in-memory session, always-online connectivity, tracing observer. The
/// offline queue is a SQLite file at `queue_path`, or at
/// `<data_dir>/courier/offline.db` when no path is given.
pub struct ApiClientBuilder {
  base_url: String,
  transport: Option<Arc<dyn Transport>>,
  session: Option<Arc<dyn SessionStore>>,
  navigator: Option<Arc<dyn Navigator>>,
  observer: Option<Arc<dyn PerformanceObserver>>,
  connectivity: Option<Arc<dyn ConnectivityProbe>>,
  queue_storage: Option<Arc<dyn QueueStorage>>,
  queue_path: Option<PathBuf>,
  settings: ExecutorSettings,
  policies: Vec<EndpointPolicy>,
  default_ttl: Duration,
  dedup_window: Duration,
  filters: BTreeMap<String, String>,
  events: EventHandler,
}

impl ApiClientBuilder {
  pub fn new(base_url: impl Into<String>) -> Self {
    Self {
      base_url: base_url.into(),
      transport: None,
      session: None,
      navigator: None,
      observer: None,
      connectivity: None,
      queue_storage: None,
      queue_path: None,
      settings: ExecutorSettings::default(),
      policies: Vec::new(),
      default_ttl: DEFAULT_TTL,
      dedup_window: DEDUP_WINDOW,
      filters: BTreeMap::new(),
      events: EventHandler::default(),
    }
  }

  pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
    self.transport = Some(transport);
    self
  }

  pub fn session(mut self, session: Arc<dyn SessionStore>) -> Self {
    self.session = Some(session);
    self
  }

  pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
    self.navigator = Some(navigator);
    self
  }

  pub fn observer(mut self, observer: Arc<dyn PerformanceObserver>) -> Self {
    self.observer = Some(observer);
    self
  }

  pub fn connectivity(mut self, probe: Arc<dyn ConnectivityProbe>) -> Self {
    self.connectivity = Some(probe);
    self
  }

  pub fn queue_storage(mut self, storage: Arc<dyn QueueStorage>) -> Self {
    self.queue_storage = Some(storage);
    self
  }

  /// Location of the default SQLite queue. Ignored when `queue_storage` is set.
  pub fn queue_path(mut self, path: impl Into<PathBuf>) -> Self {
    self.queue_path = Some(path.into());
    self
  }

  pub fn settings(mut self, settings: ExecutorSettings) -> Self {
    self.settings = settings;
    self
  }

  /// Policies consulted before the built-in table.
  pub fn policies(mut self, policies: Vec<EndpointPolicy>) -> Self {
    self.policies = policies;
    self
  }

  pub fn default_ttl(mut self, ttl: Duration) -> Self {
    self.default_ttl = ttl;
    self
  }

  pub fn dedup_window(mut self, window: Duration) -> Self {
    self.dedup_window = window;
    self
  }

  pub fn filters(mut self, filters: BTreeMap<String, String>) -> Self {
    self.filters = filters;
    self
  }

  pub fn build(self) -> ApiResult<ApiClient> {
    let urls = Arc::new(UrlBuilder::new(&self.base_url)?.with_filters(self.filters));
    let cache = Arc::new(CacheStore::new(PolicyTable::with_builtin(
      self.policies,
      self.default_ttl,
    )));

    let transport = match self.transport {
      Some(transport) => transport,
      None => Arc::new(ReqwestTransport::new()?),
    };
    let queue_storage = match self.queue_storage {
      Some(storage) => storage,
      None => Arc::new(
        SqliteQueueStorage::open(self.queue_path.as_deref())
          .map_err(|e| ApiError::Storage(e.to_string()))?,
      ),
    };

    let executor = Executor::new(
      transport,
      Arc::clone(&urls),
      self
        .session
        .unwrap_or_else(|| Arc::new(MemorySession::default())),
      self.navigator.unwrap_or_else(|| Arc::new(LogNavigator)),
      Arc::clone(&cache),
      self.events.clone(),
      self.settings,
    );

    let queue = OfflineQueue::new(
      queue_storage,
      self
        .connectivity
        .unwrap_or_else(|| Arc::new(ConnectivityFlag::default())),
      self.events.clone(),
    );

    Ok(ApiClient {
      inner: Arc::new(Inner {
        bus: Bus::new(Arc::clone(&cache)),
        dedup: Deduplicator::new(self.dedup_window),
        cache,
        executor,
        queue,
        urls,
        observer: self
          .observer
          .unwrap_or_else(|| Arc::new(TracingObserver)),
        events: self.events,
      }),
    })
  }
}
