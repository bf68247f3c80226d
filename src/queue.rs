//! Durable, ordered queue of pending mutations awaiting replay.
//!
//! Every mutating call that fails (or is attempted offline) lands here and
//! survives app restarts: the queue is persisted through the key-value
//! seam before `enqueue` returns. Operations drain high-priority-first,
//! oldest-first within a priority. An operation leaves the queue on
//! successful replay, on retry exhaustion (moved to a persisted
//! dead-letter list, never replayed again), or via the administrative
//! [`OperationQueue::clear`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::Result;
use crate::store::KeyValueStore;
use crate::transport::Method;

/// Store key for the pending queue (ordered JSON array).
const PENDING_KEY: &str = "queue_operations";
/// Store key for operations dropped after exhausting retries.
const FAILED_KEY: &str = "queue_failed_operations";

/// Drain severity. Declaration order doubles as sort order: sorting
/// ascending puts `High` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
  High,
  #[default]
  Medium,
  Low,
}

/// Mutation kind; mirrors the HTTP method used on replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
  Create,
  Update,
  Delete,
}

impl OperationKind {
  pub fn method(&self) -> Method {
    match self {
      OperationKind::Create => Method::Post,
      OperationKind::Update => Method::Put,
      OperationKind::Delete => Method::Delete,
    }
  }
}

/// A deferred mutating request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
  pub id: String,
  pub kind: OperationKind,
  pub endpoint: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub payload: Option<Value>,
  pub enqueued_at: DateTime<Utc>,
  pub retry_count: u32,
  pub priority: Priority,
}

impl QueuedOperation {
  pub fn new(
    kind: OperationKind,
    endpoint: &str,
    payload: Option<Value>,
    priority: Priority,
  ) -> Self {
    let enqueued_at = Utc::now();
    Self {
      id: operation_id(kind, endpoint, enqueued_at),
      kind,
      endpoint: endpoint.to_string(),
      payload,
      enqueued_at,
      retry_count: 0,
      priority,
    }
  }

  fn sort_key(&self) -> (Priority, DateTime<Utc>, &str) {
    (self.priority, self.enqueued_at, &self.id)
  }
}

static OPERATION_SEQ: AtomicU64 = AtomicU64::new(0);

/// Stable operation id: enqueue timestamp plus a short digest over the
/// request and a process-local sequence number, so ids stay unique across
/// restarts and stable for ordering ties.
fn operation_id(kind: OperationKind, endpoint: &str, at: DateTime<Utc>) -> String {
  let seq = OPERATION_SEQ.fetch_add(1, AtomicOrdering::Relaxed);

  let mut hasher = Sha256::new();
  hasher.update(kind.method().as_str().as_bytes());
  hasher.update(endpoint.as_bytes());
  hasher.update(at.to_rfc3339().as_bytes());
  hasher.update(seq.to_le_bytes());
  let digest = hex::encode(hasher.finalize());

  format!("{}-{}", at.timestamp_millis(), &digest[..8])
}

/// Outcome of recording a failed replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
  /// Retry budget remains; the operation stays queued.
  WillRetry { retries: u32 },
  /// Retry budget exhausted; the operation moved to the dead-letter list.
  Dropped,
}

#[derive(Debug, Default)]
struct QueueState {
  pending: Vec<QueuedOperation>,
  dead_letter: Vec<QueuedOperation>,
}

/// The queue itself. All mutations serialize behind one async mutex and
/// persist before returning, so no interleaving of an enqueue with a
/// drain-pass removal can be observed — and an app kill loses nothing.
pub struct OperationQueue<S: KeyValueStore> {
  store: Arc<S>,
  max_retries: u32,
  state: Mutex<QueueState>,
}

impl<S: KeyValueStore> OperationQueue<S> {
  /// Load persisted state from the store. Unreadable blobs are dropped
  /// with a warning rather than wedging startup.
  pub(crate) async fn load(store: Arc<S>, max_retries: u32) -> Result<Self> {
    let mut pending = read_list(&store, PENDING_KEY).await?;
    let dead_letter = read_list(&store, FAILED_KEY).await?;

    pending.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

    Ok(Self {
      store,
      max_retries,
      state: Mutex::new(QueueState {
        pending,
        dead_letter,
      }),
    })
  }

  /// Insert an operation, maintaining the sort invariant. Only the
  /// request router calls this.
  pub(crate) async fn enqueue(&self, op: QueuedOperation) -> Result<()> {
    let mut state = self.state.lock().await;

    let at = state
      .pending
      .partition_point(|existing| existing.sort_key() <= op.sort_key());
    state.pending.insert(at, op.clone());

    self.persist_pending(&state).await?;
    info!(id = %op.id, method = %op.kind.method(), endpoint = %op.endpoint, "operation queued for later sync");

    Ok(())
  }

  /// Ordered snapshot for a drain pass.
  pub async fn peek_ordered(&self) -> Vec<QueuedOperation> {
    self.state.lock().await.pending.clone()
  }

  pub async fn pending_count(&self) -> usize {
    self.state.lock().await.pending.len()
  }

  /// Operations that have failed at least once: still-queued retried ones
  /// plus everything on the dead-letter list.
  pub async fn failed_count(&self) -> usize {
    let state = self.state.lock().await;
    let retried = state.pending.iter().filter(|op| op.retry_count > 0).count();
    retried + state.dead_letter.len()
  }

  /// Operations dropped after exhausting retries (or rejected as
  /// unauthenticated), retained with full payload for manual
  /// reconciliation.
  pub async fn permanently_failed(&self) -> Vec<QueuedOperation> {
    self.state.lock().await.dead_letter.clone()
  }

  /// Remove a successfully replayed operation. Unknown ids are a no-op.
  pub(crate) async fn mark_succeeded(&self, id: &str) -> Result<()> {
    let mut state = self.state.lock().await;

    let before = state.pending.len();
    state.pending.retain(|op| op.id != id);

    if state.pending.len() != before {
      self.persist_pending(&state).await?;
    }

    Ok(())
  }

  /// Record a failed replay. At `max_retries` the operation is removed
  /// and dead-lettered — permanently failed, distinct from "will retry".
  /// Returns `None` for unknown ids.
  pub(crate) async fn mark_failed(&self, id: &str) -> Result<Option<FailureDisposition>> {
    let mut state = self.state.lock().await;

    let Some(pos) = state.pending.iter().position(|op| op.id == id) else {
      return Ok(None);
    };

    state.pending[pos].retry_count += 1;
    let retries = state.pending[pos].retry_count;

    if retries >= self.max_retries {
      let op = state.pending.remove(pos);
      warn!(id = %op.id, endpoint = %op.endpoint, retries, "operation exhausted retries, dropped");
      state.dead_letter.push(op);
      self.persist_pending(&state).await?;
      self.persist_dead_letter(&state).await?;
      Ok(Some(FailureDisposition::Dropped))
    } else {
      self.persist_pending(&state).await?;
      Ok(Some(FailureDisposition::WillRetry { retries }))
    }
  }

  /// Dead-letter an operation immediately, without burning through the
  /// retry budget. Used when replay hit an auth failure: retrying an
  /// unauthenticated write is pointless.
  pub(crate) async fn drop_permanently(&self, id: &str) -> Result<()> {
    let mut state = self.state.lock().await;

    let Some(pos) = state.pending.iter().position(|op| op.id == id) else {
      return Ok(());
    };

    let mut op = state.pending.remove(pos);
    op.retry_count += 1;
    warn!(id = %op.id, endpoint = %op.endpoint, "operation rejected as unauthenticated, dropped");
    state.dead_letter.push(op);

    self.persist_pending(&state).await?;
    self.persist_dead_letter(&state).await?;

    Ok(())
  }

  /// Administrative escape hatch: discard all pending work and the
  /// dead-letter list. This silently loses user data — callers are
  /// expected to confirm with the user first.
  pub async fn clear(&self) -> Result<()> {
    let mut state = self.state.lock().await;

    let discarded = state.pending.len() + state.dead_letter.len();
    state.pending.clear();
    state.dead_letter.clear();

    self.store.remove(PENDING_KEY).await?;
    self.store.remove(FAILED_KEY).await?;

    if discarded > 0 {
      warn!(discarded, "pending operations cleared");
    }

    Ok(())
  }

  async fn persist_pending(&self, state: &QueueState) -> Result<()> {
    let encoded = serde_json::to_string(&state.pending)?;
    self.store.set(PENDING_KEY, &encoded).await?;
    Ok(())
  }

  async fn persist_dead_letter(&self, state: &QueueState) -> Result<()> {
    let encoded = serde_json::to_string(&state.dead_letter)?;
    self.store.set(FAILED_KEY, &encoded).await?;
    Ok(())
  }
}

async fn read_list<S: KeyValueStore>(store: &Arc<S>, key: &str) -> Result<Vec<QueuedOperation>> {
  let Some(raw) = store.get(key).await? else {
    return Ok(Vec::new());
  };

  match serde_json::from_str(&raw) {
    Ok(ops) => Ok(ops),
    Err(e) => {
      warn!(key, error = %e, "discarding unreadable queue blob");
      Ok(Vec::new())
    }
  }
}
