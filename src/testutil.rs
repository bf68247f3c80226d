//! Shared test doubles.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::transport::{Method, Transport, TransportError};

/// One request as the transport saw it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RecordedCall {
  pub method: Method,
  pub endpoint: String,
  pub body: Option<Value>,
}

/// Scripted transport: pops queued outcomes in order, then falls back to
/// a default. Records every request for assertions.
pub(crate) struct MockTransport {
  script: Mutex<VecDeque<Result<Value, TransportError>>>,
  fallback: Result<Value, TransportError>,
  calls: Mutex<Vec<RecordedCall>>,
}

impl MockTransport {
  /// Every call succeeds with `{"ok": true}`.
  pub fn succeeding() -> Self {
    Self {
      script: Mutex::new(VecDeque::new()),
      fallback: Ok(json!({"ok": true})),
      calls: Mutex::new(Vec::new()),
    }
  }

  /// Every call fails with the given error.
  pub fn failing(err: TransportError) -> Self {
    Self {
      script: Mutex::new(VecDeque::new()),
      fallback: Err(err),
      calls: Mutex::new(Vec::new()),
    }
  }

  /// Queue an outcome ahead of the fallback.
  pub fn push(&self, outcome: Result<Value, TransportError>) {
    self.script.lock().unwrap().push_back(outcome);
  }

  pub fn calls(&self) -> Vec<RecordedCall> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }
}

#[async_trait]
impl Transport for MockTransport {
  async fn execute(
    &self,
    method: Method,
    endpoint: &str,
    body: Option<&Value>,
  ) -> Result<Value, TransportError> {
    self.calls.lock().unwrap().push(RecordedCall {
      method,
      endpoint: endpoint.to_string(),
      body: body.cloned(),
    });

    let scripted = self.script.lock().unwrap().pop_front();
    scripted.unwrap_or_else(|| self.fallback.clone())
  }
}

/// Poll until `check` passes or the deadline hits. Keeps tests honest
/// about asynchrony without hard-coded long sleeps.
pub(crate) async fn wait_until<F, Fut>(deadline: Duration, mut check: F)
where
  F: FnMut() -> Fut,
  Fut: std::future::Future<Output = bool>,
{
  let started = std::time::Instant::now();
  loop {
    if check().await {
      return;
    }
    if started.elapsed() > deadline {
      panic!("condition not met within {:?}", deadline);
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
}
