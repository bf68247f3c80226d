//! Offline-first synchronization engine for the EBS Home mobile client.
//!
//! The app must keep working — reads and writes — while disconnected from
//! the backend, then reconcile once connectivity returns. This crate
//! decides, for every request, whether to hit the network, serve from a
//! local cache, or defer the write for later replay. Queued mutations are
//! never lost (they persist across app restarts), retries are bounded,
//! and the UI gets an always-current picture of what is pending, what
//! failed, and when replay last ran.
//!
//! The engine is built from injected collaborators: a [`Transport`] that
//! performs network calls, a [`KeyValueStore`] for persistence, and
//! optionally a [`ConnectivityProvider`] feeding the [`NetworkMonitor`].
//!
//! ```rust,no_run
//! use ebs_sync::{EngineConfig, HttpTransport, RequestOptions, SqliteStore, SyncEngine};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = HttpTransport::new("https://api.ebs-home.example/api", Duration::from_secs(30))?;
//! let engine = SyncEngine::start(transport, SqliteStore::open()?, EngineConfig::default()).await?;
//!
//! // Cached GET: served from the network when possible, from cache when not.
//! let bookings: ebs_sync::Fetched<serde_json::Value> =
//!   engine.get("/bookings", &RequestOptions::cached("bookings")).await?;
//!
//! // Mutations made offline resolve as accepted-pending-sync, not failures.
//! let result = engine
//!   .post("/maintenance", &serde_json::json!({"description": "Leaky faucet"}), &RequestOptions::default())
//!   .await?;
//! if result.is_queued() {
//!   // show optimistic UI with a reconciliation indicator
//! }
//!
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod cache;
mod config;
mod coordinator;
mod engine;
mod error;
mod network;
mod queue;
mod router;
mod status;
mod store;
mod transport;

#[cfg(test)]
mod testutil;

pub use cache::{CacheEntry, CacheStore};
pub use config::EngineConfig;
pub use coordinator::DrainReport;
pub use engine::SyncEngine;
pub use error::{Result, SyncError};
pub use network::{ConnectivityProvider, NetworkMonitor};
pub use queue::{OperationKind, Priority, QueuedOperation};
pub use router::{Fetched, FetchSource, Mutation, RequestOptions};
pub use status::SyncStatus;
pub use store::{KeyValueStore, MemoryStore, SqliteStore, StoreError};
pub use transport::{HttpTransport, Method, Transport, TransportError};
