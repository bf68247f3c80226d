//! Persistent key-value storage seam.
//!
//! Everything the engine persists (cache entries, the operation queue,
//! the published status blob) goes through the [`KeyValueStore`] trait as
//! JSON-encoded string values, so the backing store is swappable:
//! - [`SqliteStore`] for the device (durable across app restarts)
//! - [`MemoryStore`] for tests and throwaway engines

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use thiserror::Error;

/// Storage failure, wrapped so callers never see backend types.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("database error: {0}")]
  Database(#[from] rusqlite::Error),

  #[error("storage unavailable: {0}")]
  Unavailable(String),
}

/// Async key-value store with string values.
///
/// Absence is a normal return value, never an error. Implementations must
/// make `set` durable before returning so a queued operation persisted
/// through this trait survives an app restart.
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
  async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

  async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

  async fn remove(&self, key: &str) -> Result<(), StoreError>;

  /// All keys currently present, in no particular order.
  async fn keys(&self) -> Result<Vec<String>, StoreError>;
}
