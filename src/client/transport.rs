//! HTTP transport used by the executor.

use async_trait::async_trait;
use std::collections::HashMap;
use url::Url;

use crate::cache::Method;
use crate::error::{ApiError, ApiResult};

/// A fully built request, ready to send.
#[derive(Debug, Clone)]
pub struct TransportRequest {
  pub method: Method,
  pub url: Url,
  pub headers: Vec<(String, String)>,
  pub body: Option<String>,
}

/// Raw response as received from the wire.
#[derive(Debug, Clone, Default)]
pub struct TransportResponse {
  pub status: u16,
  /// Header names are lowercased
  pub headers: HashMap<String, String>,
  pub body: Vec<u8>,
}

impl TransportResponse {
  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// Sends one request attempt.
///
/// Dropping the returned future must abort the in-flight call; the executor
/// relies on this to enforce its timeout.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, request: TransportRequest) -> ApiResult<TransportResponse>;
}

/// Transport backed by a shared `reqwest` client.
#[derive(Clone)]
pub struct ReqwestTransport {
  client: reqwest::Client,
}

impl ReqwestTransport {
  pub fn new() -> ApiResult<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("courier/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| ApiError::Config(format!("Failed to build HTTP client: {}", e)))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Transport for ReqwestTransport {
  async fn send(&self, request: TransportRequest) -> ApiResult<TransportResponse> {
    let method = match request.method {
      Method::Get => reqwest::Method::GET,
      Method::Post => reqwest::Method::POST,
      Method::Put => reqwest::Method::PUT,
      Method::Delete => reqwest::Method::DELETE,
    };

    let mut builder = self.client.request(method, request.url);
    for (name, value) in &request.headers {
      builder = builder.header(name, value);
    }
    if let Some(body) = request.body {
      builder = builder.body(body);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| ApiError::Network(format!("Network error: {}", e)))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| ApiError::Network(format!("Network error reading body: {}", e)))?
      .to_vec();

    Ok(TransportResponse {
      status,
      headers,
      body,
    })
  }
}
