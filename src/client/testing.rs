//! Scripted transport for unit tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use super::session::Navigator;
use super::transport::{Transport, TransportRequest, TransportResponse};
use crate::error::{ApiError, ApiResult};

/// What the transport does for one attempt.
#[derive(Debug, Clone)]
pub enum Step {
  Respond(TransportResponse),
  Fail(ApiError),
  /// Never completes; only a timeout ends the attempt
  Hang,
}

impl Step {
  pub fn json(status: u16, body: Value) -> Self {
    let mut headers = HashMap::new();
    headers.insert("content-type".to_string(), "application/json".to_string());
    Step::Respond(TransportResponse {
      status,
      headers,
      body: serde_json::to_vec(&body).unwrap(),
    })
  }

  pub fn status(status: u16) -> Self {
    Step::Respond(TransportResponse {
      status,
      headers: HashMap::new(),
      body: Vec::new(),
    })
  }

  pub fn network() -> Self {
    Step::Fail(ApiError::Network("Network error: connection reset".into()))
  }
}

/// Replays steps in order, repeating the last one once the script runs out.
pub struct ScriptedTransport {
  script: Mutex<VecDeque<Step>>,
  last: Mutex<Option<Step>>,
  latency: Duration,
  attempts: Mutex<Vec<(TransportRequest, Instant)>>,
}

impl ScriptedTransport {
  pub fn new(steps: Vec<Step>) -> Arc<Self> {
    Self::with_latency(steps, Duration::ZERO)
  }

  pub fn with_latency(steps: Vec<Step>, latency: Duration) -> Arc<Self> {
    Arc::new(Self {
      script: Mutex::new(steps.into()),
      last: Mutex::new(None),
      latency,
      attempts: Mutex::new(Vec::new()),
    })
  }

  pub fn attempts(&self) -> usize {
    self.attempts.lock().unwrap().len()
  }

  pub fn requests(&self) -> Vec<TransportRequest> {
    self
      .attempts
      .lock()
      .unwrap()
      .iter()
      .map(|(r, _)| r.clone())
      .collect()
  }

  /// Gaps between consecutive attempt start times.
  pub fn gaps(&self) -> Vec<Duration> {
    let attempts = self.attempts.lock().unwrap();
    attempts
      .windows(2)
      .map(|pair| pair[1].1 - pair[0].1)
      .collect()
  }

  fn next_step(&self) -> Step {
    let next = self.script.lock().unwrap().pop_front();
    let mut last = self.last.lock().unwrap();
    match next {
      Some(step) => {
        *last = Some(step.clone());
        step
      }
      None => last.clone().unwrap_or(Step::Hang),
    }
  }
}

#[async_trait]
impl Transport for ScriptedTransport {
  async fn send(&self, request: TransportRequest) -> ApiResult<TransportResponse> {
    self
      .attempts
      .lock()
      .unwrap()
      .push((request, Instant::now()));
    let step = self.next_step();

    if !self.latency.is_zero() {
      tokio::time::sleep(self.latency).await;
    }

    match step {
      Step::Respond(response) => Ok(response),
      Step::Fail(error) => Err(error),
      Step::Hang => std::future::pending().await,
    }
  }
}

/// Navigator that records when redirects happen.
#[derive(Default)]
pub struct RecordingNavigator {
  redirects: Mutex<Vec<(String, Instant)>>,
}

impl RecordingNavigator {
  pub fn redirects(&self) -> Vec<String> {
    self
      .redirects
      .lock()
      .unwrap()
      .iter()
      .map(|(page, _)| page.clone())
      .collect()
  }
}

impl Navigator for RecordingNavigator {
  fn redirect_to_login(&self, login_page: &str) {
    self
      .redirects
      .lock()
      .unwrap()
      .push((login_page.to_string(), Instant::now()));
  }
}
