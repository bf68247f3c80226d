//! Network transport seam.
//!
//! The engine never talks HTTP directly; it goes through the [`Transport`]
//! trait so tests can script outcomes and the mobile shell can inject a
//! client with its own auth plumbing. [`HttpTransport`] is the shipped
//! reqwest-backed implementation.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// HTTP method for a routed request.
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
}

impl std::fmt::Display for Method {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// How a network call failed, classified as coarsely as the engine needs.
///
/// Everything except `AuthRequired` triggers the same fallback behavior
/// (cache for GETs, enqueue for mutations); the finer HTTP distinctions
/// stay the transport's concern.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
  /// DNS failure, refused connection, or no route at all.
  #[error("network unreachable: {0}")]
  Unreachable(String),

  /// The call exceeded its deadline.
  #[error("request timed out")]
  Timeout,

  /// 401/403 from the backend. Never retried by the engine.
  #[error("authentication required")]
  AuthRequired,

  /// Any other non-success status.
  #[error("server returned status {0}")]
  Status(u16),

  /// The response body was not valid JSON.
  #[error("failed to decode response: {0}")]
  Decode(String),
}

/// Async network client the engine drives for direct calls and replay.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
  /// Execute a single request against the backend. `body` is sent as a
  /// JSON payload when present.
  async fn execute(
    &self,
    method: Method,
    endpoint: &str,
    body: Option<&Value>,
  ) -> Result<Value, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
  async fn execute(
    &self,
    method: Method,
    endpoint: &str,
    body: Option<&Value>,
  ) -> Result<Value, TransportError> {
    (**self).execute(method, endpoint, body).await
  }
}

/// reqwest-backed transport.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: Url,
}

impl HttpTransport {
  /// Create a transport for the given API base URL with a bounded
  /// per-request timeout.
  pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| TransportError::Unreachable(e.to_string()))?;

    Self::with_client(client, base_url)
  }

  /// Create a transport around a preconfigured client. The mobile shell
  /// uses this to inject default headers (session token, user agent).
  pub fn with_client(client: reqwest::Client, base_url: &str) -> Result<Self, TransportError> {
    // A trailing slash makes Url::join treat the last path segment as a
    // directory rather than replacing it.
    let normalized = if base_url.ends_with('/') {
      base_url.to_string()
    } else {
      format!("{}/", base_url)
    };

    let base_url = Url::parse(&normalized)
      .map_err(|e| TransportError::Unreachable(format!("invalid base url: {}", e)))?;

    Ok(Self { client, base_url })
  }

  fn endpoint_url(&self, endpoint: &str) -> Result<Url, TransportError> {
    self
      .base_url
      .join(endpoint.trim_start_matches('/'))
      .map_err(|e| TransportError::Unreachable(format!("invalid endpoint: {}", e)))
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn execute(
    &self,
    method: Method,
    endpoint: &str,
    body: Option<&Value>,
  ) -> Result<Value, TransportError> {
    let url = self.endpoint_url(endpoint)?;

    let mut request = match method {
      Method::Get => self.client.get(url),
      Method::Post => self.client.post(url),
      Method::Put => self.client.put(url),
      Method::Delete => self.client.delete(url),
    };

    if let Some(payload) = body {
      request = request.json(payload);
    }

    let response = request.send().await.map_err(classify_request_error)?;

    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
      return Err(TransportError::AuthRequired);
    }
    if !status.is_success() {
      return Err(TransportError::Status(status.as_u16()));
    }

    let text = response
      .text()
      .await
      .map_err(classify_request_error)?;

    if text.trim().is_empty() {
      // 204-style responses carry no body.
      return Ok(Value::Null);
    }

    serde_json::from_str(&text).map_err(|e| TransportError::Decode(e.to_string()))
  }
}

fn classify_request_error(err: reqwest::Error) -> TransportError {
  if err.is_timeout() {
    TransportError::Timeout
  } else {
    // Connect errors, DNS failures, broken pipes: all unreachable as far
    // as routing is concerned.
    TransportError::Unreachable(err.to_string())
  }
}
