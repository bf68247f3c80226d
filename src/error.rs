//! Error types for the sync engine.

use thiserror::Error;

use crate::store::StoreError;
use crate::transport::TransportError;

/// All errors the engine surfaces to callers.
#[derive(Debug, Error)]
pub enum SyncError {
  /// No connectivity at all. GETs fall back to cache and mutations are
  /// queued before this is ever surfaced; callers only see it from
  /// `force_sync` while offline.
  #[error("network unavailable")]
  NetworkUnavailable,

  /// Connectivity was present but the call itself failed (timeout, 5xx,
  /// DNS). Same fallback behavior as `NetworkUnavailable` for routing.
  #[error("transport failure: {0}")]
  Transport(TransportError),

  /// The transport reported 401/403. Never queued for retry; surfaced
  /// immediately so the host app can re-authenticate.
  #[error("authentication required")]
  AuthRequired,

  /// A GET with a cache key found neither a live network path nor a
  /// usable cache entry.
  #[error("no cached data for '{0}'")]
  NoCachedData(String),

  /// The underlying key-value store failed.
  #[error("storage error: {0}")]
  Storage(#[from] StoreError),

  /// A response or persisted blob could not be (de)serialized.
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// The coordinator task is no longer running (engine shut down).
  #[error("sync coordinator stopped")]
  CoordinatorStopped,

  /// Configuration file missing or malformed.
  #[error("config error: {0}")]
  Config(String),
}

impl From<TransportError> for SyncError {
  fn from(err: TransportError) -> Self {
    match err {
      TransportError::AuthRequired => SyncError::AuthRequired,
      other => SyncError::Transport(other),
    }
  }
}

pub type Result<T> = std::result::Result<T, SyncError>;
