//! Engine facade: construction, call surface, lifecycle.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::cache::CacheStore;
use crate::config::EngineConfig;
use crate::coordinator::{CoordinatorHandle, DrainReport, SyncCoordinator};
use crate::error::Result;
use crate::network::{ConnectivityProvider, NetworkMonitor};
use crate::queue::{OperationQueue, QueuedOperation};
use crate::router::{Fetched, Mutation, RequestOptions, RequestRouter};
use crate::status::{StatusReporter, SyncStatus};
use crate::store::KeyValueStore;
use crate::transport::Transport;

/// The offline-first sync engine.
///
/// One instance per backend + store pair, constructed with injected
/// collaborators so hosts can swap transports and storage (and tests can
/// script both). All sync state flows through this handle; there is no
/// global instance.
pub struct SyncEngine<T: Transport, S: KeyValueStore> {
  monitor: NetworkMonitor,
  cache: CacheStore<S>,
  queue: Arc<OperationQueue<S>>,
  router: RequestRouter<T, S>,
  reporter: StatusReporter<S>,
  coordinator: CoordinatorHandle,
  connectivity_task: Option<JoinHandle<()>>,
}

impl<T: Transport, S: KeyValueStore> SyncEngine<T, S> {
  /// Start an engine whose connectivity is driven manually through
  /// [`SyncEngine::network`]. Initial state is optimistic-online.
  pub async fn start(transport: T, store: S, config: EngineConfig) -> Result<Self> {
    Self::build(transport, store, config, NetworkMonitor::new(None), None).await
  }

  /// Start an engine wired to a platform connectivity provider.
  pub async fn start_with_connectivity<P: ConnectivityProvider>(
    transport: T,
    store: S,
    config: EngineConfig,
    provider: P,
  ) -> Result<Self> {
    let monitor = NetworkMonitor::new(None);
    let connectivity_task = monitor.drive(provider);
    Self::build(transport, store, config, monitor, Some(connectivity_task)).await
  }

  async fn build(
    transport: T,
    store: S,
    config: EngineConfig,
    monitor: NetworkMonitor,
    connectivity_task: Option<JoinHandle<()>>,
  ) -> Result<Self> {
    let transport = Arc::new(transport);
    let store = Arc::new(store);

    let cache = CacheStore::new(Arc::clone(&store), config.default_cache_ttl());
    let queue = Arc::new(OperationQueue::load(Arc::clone(&store), config.max_retries).await?);

    let router = RequestRouter::new(
      Arc::clone(&transport),
      monitor.clone(),
      cache.clone(),
      Arc::clone(&queue),
    );

    let coordinator = SyncCoordinator::spawn(
      transport,
      Arc::clone(&store),
      Arc::clone(&queue),
      monitor.clone(),
      config.sync_interval(),
      config.request_timeout(),
    );

    let reporter = StatusReporter::new(monitor.clone(), Arc::clone(&queue), coordinator.last_sync());

    Ok(Self {
      monitor,
      cache,
      queue,
      router,
      reporter,
      coordinator,
      connectivity_task,
    })
  }

  /// Routed GET; see [`RequestOptions`] for caching behavior.
  pub async fn get<R: DeserializeOwned>(
    &self,
    endpoint: &str,
    opts: &RequestOptions,
  ) -> Result<Fetched<R>> {
    self.router.get(endpoint, opts).await
  }

  /// Routed create. Queued when the backend is unreachable.
  pub async fn post<P: Serialize>(
    &self,
    endpoint: &str,
    payload: &P,
    opts: &RequestOptions,
  ) -> Result<Mutation> {
    self
      .router
      .post(endpoint, serde_json::to_value(payload)?, opts)
      .await
  }

  /// Routed update. Queued when the backend is unreachable.
  pub async fn put<P: Serialize>(
    &self,
    endpoint: &str,
    payload: &P,
    opts: &RequestOptions,
  ) -> Result<Mutation> {
    self
      .router
      .put(endpoint, serde_json::to_value(payload)?, opts)
      .await
  }

  /// Routed delete. Queued when the backend is unreachable.
  pub async fn delete(&self, endpoint: &str, opts: &RequestOptions) -> Result<Mutation> {
    self.router.delete(endpoint, opts).await
  }

  /// Run a drain pass now. Errors with `NetworkUnavailable` while
  /// offline instead of attempting and queueing further failures.
  pub async fn force_sync(&self) -> Result<DrainReport> {
    self.coordinator.force_sync().await
  }

  /// Current status snapshot, recomputed on every call.
  pub async fn sync_status(&self) -> SyncStatus {
    self.reporter.snapshot().await
  }

  /// Drop every cached response.
  pub async fn clear_cache(&self) -> Result<()> {
    self.cache.clear_all().await
  }

  /// Discard all pending and dead-lettered operations. This silently
  /// loses user data; confirm with the user before calling.
  pub async fn clear_pending_operations(&self) -> Result<()> {
    self.queue.clear().await
  }

  /// Opportunistic bulk eviction of expired cache entries (e.g. on app
  /// foreground). Returns how many were removed.
  pub async fn sweep_expired_cache(&self) -> Result<usize> {
    self.cache.sweep_expired().await
  }

  /// Operations dropped after exhausting retries, retained for manual
  /// reconciliation.
  pub async fn permanently_failed(&self) -> Vec<QueuedOperation> {
    self.queue.permanently_failed().await
  }

  /// The engine's connectivity monitor. Platform glue reports
  /// transitions here when no [`ConnectivityProvider`] is wired.
  pub fn network(&self) -> &NetworkMonitor {
    &self.monitor
  }

  /// Stop the coordinator (and connectivity bridge) deterministically.
  /// Pending operations stay persisted for the next start.
  pub async fn shutdown(self) {
    if let Some(task) = self.connectivity_task {
      task.abort();
    }
    self.coordinator.shutdown().await;
  }
}
