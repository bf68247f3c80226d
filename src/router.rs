//! Per-request routing: network, cache fallback, or queue.
//!
//! Single entry point for callers. GETs with a cache key get write-through
//! caching and offline fallback; mutations that cannot reach the backend
//! are queued and reported as accepted-pending-sync so the UI can show
//! optimistic success instead of a hard failure.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

use crate::cache::CacheStore;
use crate::error::{Result, SyncError};
use crate::network::NetworkMonitor;
use crate::queue::{OperationKind, OperationQueue, Priority, QueuedOperation};
use crate::store::KeyValueStore;
use crate::transport::{Method, Transport, TransportError};

/// Options for a routed request.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
  /// Cache key for GETs. Absent means the caller opted out of offline
  /// support for this call: network only, no fallback.
  pub cache_key: Option<String>,
  /// Entry lifetime for the write-through; engine default when `None`.
  pub cache_ttl: Option<chrono::Duration>,
  /// Drain severity if the request ends up queued.
  pub priority: Priority,
  /// Route the GET as if no cache key had been supplied.
  pub skip_cache: bool,
}

impl RequestOptions {
  /// Options for a cached GET under the given key.
  pub fn cached(key: impl Into<String>) -> Self {
    Self {
      cache_key: Some(key.into()),
      ..Self::default()
    }
  }

  pub fn with_priority(mut self, priority: Priority) -> Self {
    self.priority = priority;
    self
  }

  pub fn with_ttl(mut self, ttl: chrono::Duration) -> Self {
    self.cache_ttl = Some(ttl);
    self
  }
}

/// Where a GET's data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
  /// Fresh from the backend.
  Network,
  /// The network call failed; this is the cached value (possibly behind
  /// the backend, still within its TTL).
  CacheFallback,
  /// Offline from the start; served straight from cache.
  OfflineCache,
}

/// A GET result with its provenance.
#[derive(Debug, Clone)]
pub struct Fetched<T> {
  pub data: T,
  pub source: FetchSource,
}

/// A mutation result. `Queued` is the "accepted, pending sync" outcome —
/// distinguishable so the caller can render optimistic UI with a
/// reconciliation indicator.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
  /// Backend applied the call; response body returned unchanged.
  Applied(Value),
  /// Deferred for replay; the id locates it in the queue.
  Queued { operation_id: String },
}

impl Mutation {
  pub fn is_queued(&self) -> bool {
    matches!(self, Mutation::Queued { .. })
  }
}

pub struct RequestRouter<T: Transport, S: KeyValueStore> {
  transport: Arc<T>,
  monitor: NetworkMonitor,
  cache: CacheStore<S>,
  queue: Arc<OperationQueue<S>>,
}

impl<T: Transport, S: KeyValueStore> RequestRouter<T, S> {
  pub(crate) fn new(
    transport: Arc<T>,
    monitor: NetworkMonitor,
    cache: CacheStore<S>,
    queue: Arc<OperationQueue<S>>,
  ) -> Self {
    Self {
      transport,
      monitor,
      cache,
      queue,
    }
  }

  /// Route a GET.
  pub async fn get<R: DeserializeOwned>(
    &self,
    endpoint: &str,
    opts: &RequestOptions,
  ) -> Result<Fetched<R>> {
    let cache_key = if opts.skip_cache {
      None
    } else {
      opts.cache_key.as_deref()
    };

    let Some(key) = cache_key else {
      let value = self
        .transport
        .execute(Method::Get, endpoint, None)
        .await
        .map_err(SyncError::from)?;
      return Ok(Fetched {
        data: serde_json::from_value(value)?,
        source: FetchSource::Network,
      });
    };

    if !self.monitor.is_online() {
      // Skip the network attempt entirely; absence here is a hard
      // failure.
      return match self.cache.get(key).await? {
        Some(data) => Ok(Fetched {
          data,
          source: FetchSource::OfflineCache,
        }),
        None => Err(SyncError::NoCachedData(key.to_string())),
      };
    }

    match self.transport.execute(Method::Get, endpoint, None).await {
      Ok(value) => {
        // Write-through. A cache write failure shouldn't cost the caller
        // a response we already hold.
        if let Err(e) = self.cache.put(key, &value, opts.cache_ttl).await {
          warn!(key, error = %e, "write-through to cache failed");
        }
        Ok(Fetched {
          data: serde_json::from_value(value)?,
          source: FetchSource::Network,
        })
      }
      Err(TransportError::AuthRequired) => Err(SyncError::AuthRequired),
      Err(e) => match self.cache.get(key).await? {
        Some(data) => {
          warn!(endpoint, error = %e, "network failed, serving cached value");
          Ok(Fetched {
            data,
            source: FetchSource::CacheFallback,
          })
        }
        None => Err(SyncError::from(e)),
      },
    }
  }

  pub async fn post(
    &self,
    endpoint: &str,
    payload: Value,
    opts: &RequestOptions,
  ) -> Result<Mutation> {
    self
      .mutate(OperationKind::Create, endpoint, Some(payload), opts)
      .await
  }

  pub async fn put(&self, endpoint: &str, payload: Value, opts: &RequestOptions) -> Result<Mutation> {
    self
      .mutate(OperationKind::Update, endpoint, Some(payload), opts)
      .await
  }

  pub async fn delete(&self, endpoint: &str, opts: &RequestOptions) -> Result<Mutation> {
    self.mutate(OperationKind::Delete, endpoint, None, opts).await
  }

  /// Route a mutation. Mutation responses are never cached.
  async fn mutate(
    &self,
    kind: OperationKind,
    endpoint: &str,
    payload: Option<Value>,
    opts: &RequestOptions,
  ) -> Result<Mutation> {
    if self.monitor.is_online() {
      match self
        .transport
        .execute(kind.method(), endpoint, payload.as_ref())
        .await
      {
        Ok(value) => return Ok(Mutation::Applied(value)),
        // Retrying an unauthenticated write is pointless and can amplify
        // damage; surface it instead of queueing.
        Err(TransportError::AuthRequired) => return Err(SyncError::AuthRequired),
        Err(e) => {
          warn!(endpoint, error = %e, "mutation failed, deferring for replay");
        }
      }
    }

    let op = QueuedOperation::new(kind, endpoint, payload, opts.priority);
    let operation_id = op.id.clone();
    self.queue.enqueue(op).await?;

    Ok(Mutation::Queued { operation_id })
  }
}

impl<T: Transport, S: KeyValueStore> Clone for RequestRouter<T, S> {
  fn clone(&self) -> Self {
    Self {
      transport: Arc::clone(&self.transport),
      monitor: self.monitor.clone(),
      cache: self.cache.clone(),
      queue: Arc::clone(&self.queue),
    }
  }
}
