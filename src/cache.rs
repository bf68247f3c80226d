//! TTL cache for successful GET responses.
//!
//! Entries are written through on network success and served as fallback
//! when the network is unavailable. Expiry is enforced on read: an entry
//! past its deadline is treated as absent and physically removed. This
//! component performs no network I/O.

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::store::KeyValueStore;

/// Store-key prefix for cache entries (`cache_<key>`).
const CACHE_KEY_PREFIX: &str = "cache_";

/// A cached response body with its expiry window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
  /// Last-known-good response body.
  pub data: Value,
  pub stored_at: DateTime<Utc>,
  /// `stored_at + ttl`; the entry is readable only while `now` is before
  /// this.
  pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
  fn is_expired(&self, now: DateTime<Utc>) -> bool {
    now >= self.expires_at
  }
}

/// Cache keyed by caller-supplied strings, persisted through the
/// key-value seam.
pub struct CacheStore<S: KeyValueStore> {
  store: Arc<S>,
  default_ttl: Duration,
}

impl<S: KeyValueStore> CacheStore<S> {
  pub fn new(store: Arc<S>, default_ttl: Duration) -> Self {
    Self { store, default_ttl }
  }

  fn storage_key(key: &str) -> String {
    format!("{}{}", CACHE_KEY_PREFIX, key)
  }

  /// Store a response body under `key`, overwriting any previous entry.
  /// `ttl` falls back to the configured default (24h in the shipped
  /// config).
  pub async fn put<T: Serialize>(&self, key: &str, data: &T, ttl: Option<Duration>) -> Result<()> {
    let now = Utc::now();
    let entry = CacheEntry {
      data: serde_json::to_value(data)?,
      stored_at: now,
      expires_at: now + ttl.unwrap_or(self.default_ttl),
    };

    let encoded = serde_json::to_string(&entry)?;
    self.store.set(&Self::storage_key(key), &encoded).await?;

    Ok(())
  }

  /// Read a live entry. Expired or unreadable entries are evicted and
  /// reported as absent. Reads never touch `stored_at`/`expires_at`.
  pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
    match self.entry(key).await? {
      Some(entry) => Ok(Some(serde_json::from_value(entry.data)?)),
      None => Ok(None),
    }
  }

  pub(crate) async fn entry(&self, key: &str) -> Result<Option<CacheEntry>> {
    let storage_key = Self::storage_key(key);

    let raw = match self.store.get(&storage_key).await? {
      Some(raw) => raw,
      None => return Ok(None),
    };

    let entry: CacheEntry = match serde_json::from_str(&raw) {
      Ok(entry) => entry,
      Err(e) => {
        // Unreadable entries count as absent; drop them so they can't
        // wedge the key forever.
        debug!(key, error = %e, "evicting unreadable cache entry");
        self.store.remove(&storage_key).await?;
        return Ok(None);
      }
    };

    if entry.is_expired(Utc::now()) {
      self.store.remove(&storage_key).await?;
      return Ok(None);
    }

    Ok(Some(entry))
  }

  /// Drop a single entry.
  pub async fn invalidate(&self, key: &str) -> Result<()> {
    self.store.remove(&Self::storage_key(key)).await?;
    Ok(())
  }

  /// Drop every cache entry. Other store keys (queue, status) are left
  /// alone.
  pub async fn clear_all(&self) -> Result<()> {
    for key in self.store.keys().await? {
      if key.starts_with(CACHE_KEY_PREFIX) {
        self.store.remove(&key).await?;
      }
    }
    Ok(())
  }

  /// Bulk eviction pass over every entry; returns how many were removed.
  /// Safe to run opportunistically (app foreground, post-drain).
  pub async fn sweep_expired(&self) -> Result<usize> {
    let now = Utc::now();
    let mut evicted = 0;

    for key in self.store.keys().await? {
      if !key.starts_with(CACHE_KEY_PREFIX) {
        continue;
      }

      let expired = match self.store.get(&key).await? {
        Some(raw) => match serde_json::from_str::<CacheEntry>(&raw) {
          Ok(entry) => entry.is_expired(now),
          // Unreadable: sweep it along with the expired ones.
          Err(_) => true,
        },
        None => false,
      };

      if expired {
        self.store.remove(&key).await?;
        evicted += 1;
      }
    }

    if evicted > 0 {
      debug!(evicted, "swept expired cache entries");
    }

    Ok(evicted)
  }
}

impl<S: KeyValueStore> Clone for CacheStore<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      default_ttl: self.default_ttl,
    }
  }
}
