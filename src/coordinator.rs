//! Replay orchestration.
//!
//! One coordinator task per engine owns all replay: it wakes on a periodic
//! tick while online, on an offline→online transition, and on explicit
//! force-sync commands. Each wake-up runs a single drain pass over the
//! snapshot of the queue taken at pass start; operations enqueued
//! mid-pass wait for the next cycle, which bounds a pass's duration. The
//! task is commanded over a channel and joined on shutdown, so teardown
//! is deterministic.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SyncError};
use crate::network::NetworkMonitor;
use crate::queue::{FailureDisposition, OperationQueue};
use crate::status::{SyncStatus, STATUS_KEY};
use crate::store::KeyValueStore;
use crate::transport::{Transport, TransportError};

/// The coordinator's two states. Observable through
/// [`CoordinatorHandle::state`] for instrumentation; all transitions
/// happen inside the coordinator task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
  Idle,
  Draining,
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
  /// Operations in the snapshot taken at pass start.
  pub attempted: usize,
  /// Replayed and removed.
  pub succeeded: usize,
  /// Failed with retry budget remaining.
  pub retrying: usize,
  /// Dropped to the dead-letter list (retries exhausted or auth-rejected).
  pub dropped: usize,
}

pub(crate) enum Command {
  ForceSync(oneshot::Sender<Result<DrainReport>>),
  Shutdown,
}

/// Handle the engine keeps: command channel plus read-side views of the
/// coordinator's state.
pub(crate) struct CoordinatorHandle {
  cmd_tx: mpsc::Sender<Command>,
  task: JoinHandle<()>,
  last_sync_rx: watch::Receiver<Option<DateTime<Utc>>>,
  state_rx: watch::Receiver<DrainState>,
}

impl CoordinatorHandle {
  pub(crate) async fn force_sync(&self) -> Result<DrainReport> {
    let (tx, rx) = oneshot::channel();
    self
      .cmd_tx
      .send(Command::ForceSync(tx))
      .await
      .map_err(|_| SyncError::CoordinatorStopped)?;

    rx.await.map_err(|_| SyncError::CoordinatorStopped)?
  }

  pub(crate) fn last_sync(&self) -> watch::Receiver<Option<DateTime<Utc>>> {
    self.last_sync_rx.clone()
  }

  pub(crate) fn state(&self) -> DrainState {
    *self.state_rx.borrow()
  }

  pub(crate) async fn shutdown(self) {
    if self.cmd_tx.send(Command::Shutdown).await.is_err() {
      return;
    }
    if let Err(e) = self.task.await {
      warn!(error = %e, "coordinator task did not shut down cleanly");
    }
  }
}

pub(crate) struct SyncCoordinator<T: Transport, S: KeyValueStore> {
  transport: Arc<T>,
  store: Arc<S>,
  queue: Arc<OperationQueue<S>>,
  monitor: NetworkMonitor,
  interval: Duration,
  request_timeout: Duration,
  state_tx: watch::Sender<DrainState>,
  last_sync_tx: watch::Sender<Option<DateTime<Utc>>>,
}

impl<T: Transport, S: KeyValueStore> SyncCoordinator<T, S> {
  pub(crate) fn spawn(
    transport: Arc<T>,
    store: Arc<S>,
    queue: Arc<OperationQueue<S>>,
    monitor: NetworkMonitor,
    interval: Duration,
    request_timeout: Duration,
  ) -> CoordinatorHandle {
    let (state_tx, state_rx) = watch::channel(DrainState::Idle);
    let (last_sync_tx, last_sync_rx) = watch::channel(None);
    let (cmd_tx, cmd_rx) = mpsc::channel(16);

    let coordinator = Self {
      transport,
      store,
      queue,
      monitor,
      interval,
      request_timeout,
      state_tx,
      last_sync_tx,
    };

    let task = tokio::spawn(coordinator.run(cmd_rx));

    CoordinatorHandle {
      cmd_tx,
      task,
      last_sync_rx,
      state_rx,
    }
  }

  async fn run(self, mut commands: mpsc::Receiver<Command>) {
    // First tick lands one full interval after startup; a queue persisted
    // from a previous run is replayed on that tick, on reconnect, or on
    // an explicit force-sync.
    let start = tokio::time::Instant::now() + self.interval;
    let mut ticker = tokio::time::interval_at(start, self.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut connectivity = self.monitor.subscribe();
    let mut was_online = *connectivity.borrow();

    loop {
      tokio::select! {
        _ = ticker.tick() => {
          if self.monitor.is_online() {
            self.drain().await;
          }
        }
        changed = connectivity.changed() => {
          // The monitor outlives the coordinator, so the sender side
          // cannot drop while this task runs.
          if changed.is_ok() {
            let online = *connectivity.borrow_and_update();
            if online && !was_online {
              debug!("connectivity regained, draining queue");
              self.drain().await;
            }
            was_online = online;
          }
        }
        cmd = commands.recv() => match cmd {
          Some(Command::ForceSync(ack)) => {
            let result = if self.monitor.is_online() {
              Ok(self.drain().await)
            } else {
              // Fail fast rather than attempting and queuing further
              // failures.
              Err(SyncError::NetworkUnavailable)
            };
            let _ = ack.send(result);
          }
          Some(Command::Shutdown) | None => break,
        },
      }
    }

    debug!("sync coordinator stopped");
  }

  /// One drain pass over the current queue snapshot. Per-operation
  /// outcomes are independent: one permanently broken request cannot
  /// starve the rest of the queue.
  async fn drain(&self) -> DrainReport {
    let snapshot = self.queue.peek_ordered().await;
    let mut report = DrainReport {
      attempted: snapshot.len(),
      ..DrainReport::default()
    };

    self.state_tx.send_replace(DrainState::Draining);

    for op in snapshot {
      if !self.monitor.is_online() {
        // Lost connectivity mid-pass. Stop without touching retry
        // counts; the reconnect event starts the next pass.
        debug!("went offline mid-drain, ending pass early");
        break;
      }

      let outcome = tokio::time::timeout(
        self.request_timeout,
        self
          .transport
          .execute(op.kind.method(), &op.endpoint, op.payload.as_ref()),
      )
      .await
      .unwrap_or(Err(TransportError::Timeout));

      match outcome {
        Ok(_) => {
          if let Err(e) = self.queue.mark_succeeded(&op.id).await {
            error!(id = %op.id, error = %e, "failed to remove replayed operation");
          } else {
            report.succeeded += 1;
          }
        }
        Err(TransportError::AuthRequired) => {
          if let Err(e) = self.queue.drop_permanently(&op.id).await {
            error!(id = %op.id, error = %e, "failed to drop unauthenticated operation");
          } else {
            report.dropped += 1;
          }
        }
        Err(e) => {
          warn!(id = %op.id, endpoint = %op.endpoint, error = %e, "replay failed");
          match self.queue.mark_failed(&op.id).await {
            Ok(Some(FailureDisposition::WillRetry { .. })) => report.retrying += 1,
            Ok(Some(FailureDisposition::Dropped)) => report.dropped += 1,
            Ok(None) => {}
            Err(e) => error!(id = %op.id, error = %e, "failed to record replay failure"),
          }
        }
      }
    }

    self.last_sync_tx.send_replace(Some(Utc::now()));
    self.publish_status().await;
    self.state_tx.send_replace(DrainState::Idle);

    if report.attempted > 0 {
      info!(
        attempted = report.attempted,
        succeeded = report.succeeded,
        retrying = report.retrying,
        dropped = report.dropped,
        "drain pass finished"
      );
    }

    report
  }

  /// Recompute the status snapshot and persist it under `sync_status`.
  /// The blob is informational; a write failure is logged, not fatal.
  async fn publish_status(&self) {
    let last_sync_at = *self.last_sync_tx.borrow();
    let status = SyncStatus {
      is_online: self.monitor.is_online(),
      last_sync_at,
      pending_operations: self.queue.pending_count().await,
      failed_operations: self.queue.failed_count().await,
    };

    match serde_json::to_string(&status) {
      Ok(encoded) => {
        if let Err(e) = self.store.set(STATUS_KEY, &encoded).await {
          warn!(error = %e, "failed to persist sync status");
        }
      }
      Err(e) => warn!(error = %e, "failed to encode sync status"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::queue::{OperationKind, Priority, QueuedOperation};
  use crate::store::MemoryStore;
  use crate::testutil::{wait_until, MockTransport};
  use serde_json::json;

  struct Harness {
    transport: Arc<MockTransport>,
    store: Arc<MemoryStore>,
    queue: Arc<OperationQueue<MemoryStore>>,
    monitor: NetworkMonitor,
    handle: CoordinatorHandle,
  }

  async fn harness(transport: MockTransport, online: bool, interval: Duration) -> Harness {
    let transport = Arc::new(transport);
    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(OperationQueue::load(Arc::clone(&store), 3).await.unwrap());
    let monitor = NetworkMonitor::new(Some(online));

    let handle = SyncCoordinator::spawn(
      Arc::clone(&transport),
      Arc::clone(&store),
      Arc::clone(&queue),
      monitor.clone(),
      interval,
      Duration::from_secs(5),
    );

    Harness {
      transport,
      store,
      queue,
      monitor,
      handle,
    }
  }

  fn op(kind: OperationKind, endpoint: &str, payload: Option<serde_json::Value>) -> QueuedOperation {
    QueuedOperation::new(kind, endpoint, payload, Priority::Medium)
  }

  #[tokio::test]
  async fn reconnect_drains_all_queued_operations() {
    let h = harness(MockTransport::succeeding(), false, Duration::from_secs(60)).await;

    for i in 0..3 {
      h.queue
        .enqueue(op(
          OperationKind::Create,
          &format!("/bookings/{}", i),
          Some(json!({"i": i})),
        ))
        .await
        .unwrap();
    }
    assert_eq!(h.queue.pending_count().await, 3);

    h.monitor.set_online(true);

    let queue = Arc::clone(&h.queue);
    wait_until(Duration::from_secs(2), || {
      let queue = Arc::clone(&queue);
      async move { queue.pending_count().await == 0 }
    })
    .await;

    assert_eq!(h.transport.call_count(), 3);
    assert_eq!(h.queue.failed_count().await, 0);

    h.handle.shutdown().await;
  }

  #[tokio::test]
  async fn replay_sends_the_operation_byte_identical() {
    let h = harness(MockTransport::succeeding(), true, Duration::from_secs(60)).await;

    let queued = op(
      OperationKind::Create,
      "/maintenance",
      Some(json!({"description": "Leaky faucet"})),
    );
    h.queue.enqueue(queued.clone()).await.unwrap();

    let report = h.handle.force_sync().await.unwrap();
    assert_eq!(report.succeeded, 1);

    let calls = h.transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method, queued.kind.method());
    assert_eq!(calls[0].endpoint, queued.endpoint);
    assert_eq!(calls[0].body, queued.payload);

    h.handle.shutdown().await;
  }

  #[tokio::test]
  async fn one_broken_operation_does_not_starve_the_rest() {
    let transport = MockTransport::succeeding();
    transport.push(Err(TransportError::Status(500)));

    let h = harness(transport, true, Duration::from_secs(60)).await;

    let broken = op(OperationKind::Create, "/bookings", Some(json!({"n": 1})));
    let healthy = op(OperationKind::Update, "/checklists/2", Some(json!({"n": 2})));
    h.queue.enqueue(broken.clone()).await.unwrap();
    h.queue.enqueue(healthy.clone()).await.unwrap();

    let report = h.handle.force_sync().await.unwrap();
    assert_eq!(report.attempted, 2);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.retrying, 1);

    let remaining = h.queue.peek_ordered().await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, broken.id);
    assert_eq!(remaining[0].retry_count, 1);

    h.handle.shutdown().await;
  }

  #[tokio::test]
  async fn retry_exhaustion_drops_the_operation_for_good() {
    let h = harness(
      MockTransport::failing(TransportError::Status(503)),
      true,
      Duration::from_secs(60),
    )
    .await;

    let doomed = op(OperationKind::Create, "/maintenance", Some(json!({})));
    h.queue.enqueue(doomed.clone()).await.unwrap();

    for _ in 0..2 {
      let report = h.handle.force_sync().await.unwrap();
      assert_eq!(report.retrying, 1);
    }
    let report = h.handle.force_sync().await.unwrap();
    assert_eq!(report.dropped, 1);

    assert_eq!(h.queue.pending_count().await, 0);
    assert_eq!(h.queue.failed_count().await, 1);
    let attempts = h.transport.call_count();

    // A further pass replays nothing.
    let report = h.handle.force_sync().await.unwrap();
    assert_eq!(report.attempted, 0);
    assert_eq!(h.transport.call_count(), attempts);

    h.handle.shutdown().await;
  }

  #[tokio::test]
  async fn force_sync_fails_fast_while_offline() {
    let h = harness(MockTransport::succeeding(), false, Duration::from_secs(60)).await;

    let result = h.handle.force_sync().await;
    assert!(matches!(result, Err(SyncError::NetworkUnavailable)));
    assert_eq!(h.transport.call_count(), 0);

    h.handle.shutdown().await;
  }

  #[tokio::test]
  async fn auth_rejection_dead_letters_without_retries() {
    let h = harness(
      MockTransport::failing(TransportError::AuthRequired),
      true,
      Duration::from_secs(60),
    )
    .await;

    let rejected = op(OperationKind::Update, "/users/me", Some(json!({})));
    h.queue.enqueue(rejected.clone()).await.unwrap();

    let report = h.handle.force_sync().await.unwrap();
    assert_eq!(report.dropped, 1);
    assert_eq!(h.transport.call_count(), 1);
    assert_eq!(h.queue.pending_count().await, 0);
    assert_eq!(h.queue.failed_count().await, 1);

    h.handle.shutdown().await;
  }

  #[tokio::test]
  async fn periodic_tick_drains_while_online() {
    let h = harness(MockTransport::succeeding(), true, Duration::from_millis(40)).await;

    h.queue
      .enqueue(op(OperationKind::Create, "/bookings", Some(json!({}))))
      .await
      .unwrap();

    let queue = Arc::clone(&h.queue);
    wait_until(Duration::from_secs(2), || {
      let queue = Arc::clone(&queue);
      async move { queue.pending_count().await == 0 }
    })
    .await;

    h.handle.shutdown().await;
  }

  #[tokio::test]
  async fn status_is_published_after_every_pass() {
    let h = harness(MockTransport::succeeding(), true, Duration::from_secs(60)).await;

    h.queue
      .enqueue(op(OperationKind::Create, "/bookings", Some(json!({}))))
      .await
      .unwrap();
    h.handle.force_sync().await.unwrap();

    let raw = h.store.get(STATUS_KEY).await.unwrap().unwrap();
    let status: SyncStatus = serde_json::from_str(&raw).unwrap();
    assert!(status.is_online);
    assert!(status.last_sync_at.is_some());
    assert_eq!(status.pending_operations, 0);
    assert_eq!(status.failed_operations, 0);

    h.handle.shutdown().await;
  }

  #[tokio::test]
  async fn state_returns_to_idle_between_passes() {
    let h = harness(MockTransport::succeeding(), true, Duration::from_secs(60)).await;

    assert_eq!(h.handle.state(), DrainState::Idle);
    h.handle.force_sync().await.unwrap();
    assert_eq!(h.handle.state(), DrainState::Idle);

    h.handle.shutdown().await;
  }

  #[tokio::test]
  async fn force_sync_after_shutdown_reports_stopped() {
    let h = harness(MockTransport::succeeding(), true, Duration::from_secs(60)).await;

    let cmd_tx = h.handle.cmd_tx.clone();
    h.handle.shutdown().await;

    let (tx, _rx) = oneshot::channel();
    assert!(cmd_tx.send(Command::ForceSync(tx)).await.is_err());
  }
}
