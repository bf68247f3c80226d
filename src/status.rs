//! Aggregated sync status for the UI layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

use crate::network::NetworkMonitor;
use crate::queue::OperationQueue;
use crate::store::KeyValueStore;

/// Store key for the last-published status blob. Informational only; the
/// snapshot is always recomputable.
pub(crate) const STATUS_KEY: &str = "sync_status";

/// Point-in-time picture of the engine: connectivity, queue depth, and
/// when replay last ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
  pub is_online: bool,
  pub last_sync_at: Option<DateTime<Utc>>,
  /// Operations awaiting replay.
  pub pending_operations: usize,
  /// Operations that have failed at least once: still-queued retried ones
  /// plus permanently dropped ones.
  pub failed_operations: usize,
}

/// Pure read-side aggregation of monitor + queue + coordinator state.
/// Snapshots are recomputed on every call — never cached — so the UI is
/// never misled about outstanding risk.
pub struct StatusReporter<S: KeyValueStore> {
  monitor: NetworkMonitor,
  queue: Arc<OperationQueue<S>>,
  last_sync: watch::Receiver<Option<DateTime<Utc>>>,
}

impl<S: KeyValueStore> StatusReporter<S> {
  pub(crate) fn new(
    monitor: NetworkMonitor,
    queue: Arc<OperationQueue<S>>,
    last_sync: watch::Receiver<Option<DateTime<Utc>>>,
  ) -> Self {
    Self {
      monitor,
      queue,
      last_sync,
    }
  }

  pub async fn snapshot(&self) -> SyncStatus {
    SyncStatus {
      is_online: self.monitor.is_online(),
      last_sync_at: *self.last_sync.borrow(),
      pending_operations: self.queue.pending_count().await,
      failed_operations: self.queue.failed_count().await,
    }
  }
}

impl<S: KeyValueStore> Clone for StatusReporter<S> {
  fn clone(&self) -> Self {
    Self {
      monitor: self.monitor.clone(),
      queue: Arc::clone(&self.queue),
      last_sync: self.last_sync.clone(),
    }
  }
}
