//! Connectivity state tracking.
//!
//! The monitor is the only source of online/offline truth for the rest of
//! the engine. State lives in a `watch` channel: point-in-time reads via
//! [`NetworkMonitor::is_online`], and subscribers get a receiver already
//! seeded with the current state, so a new listener is never blind to
//! existing status. Transitions are reported raw; any debouncing is the
//! consumer's call.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

/// Platform primitive the monitor wraps: a point-in-time reading plus a
/// stream of raw state changes.
pub trait ConnectivityProvider: Send + 'static {
  /// Current platform state; `None` when the platform cannot tell.
  fn current(&self) -> Option<bool>;

  /// Stream of connectivity changes. The stream ending means the platform
  /// side went away; the monitor then keeps its last known state.
  fn changes(self) -> mpsc::UnboundedReceiver<bool>;
}

/// Shared connectivity state.
#[derive(Clone)]
pub struct NetworkMonitor {
  tx: Arc<watch::Sender<bool>>,
}

impl NetworkMonitor {
  /// Create a monitor. When the platform cannot determine connectivity
  /// (`None`), default to online: an unreachable network fails fast on
  /// the real request and populates the queue, whereas assuming offline
  /// would silently discard every network call.
  pub fn new(initial: Option<bool>) -> Self {
    let (tx, _rx) = watch::channel(initial.unwrap_or(true));
    Self { tx: Arc::new(tx) }
  }

  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  /// Record a connectivity transition. Called by platform glue (or a
  /// bridged [`ConnectivityProvider`]); no other component may mutate
  /// connectivity state.
  pub fn set_online(&self, online: bool) {
    let changed = self.tx.send_if_modified(|state| {
      if *state == online {
        false
      } else {
        *state = online;
        true
      }
    });

    if changed {
      info!(online, "connectivity changed");
    }
  }

  /// Subscribe to transitions. The receiver's current value is the state
  /// at subscription time.
  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }

  /// Seed from a provider's current reading and forward its change stream
  /// into this monitor. The returned task ends when the provider's stream
  /// closes; the engine owns it and aborts it on shutdown.
  pub fn drive<P: ConnectivityProvider>(&self, provider: P) -> JoinHandle<()> {
    self.set_online(provider.current().unwrap_or(true));

    let monitor = self.clone();
    let mut changes = provider.changes();

    tokio::spawn(async move {
      while let Some(online) = changes.recv().await {
        monitor.set_online(online);
      }
    })
  }
}

impl Default for NetworkMonitor {
  fn default() -> Self {
    Self::new(None)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unknown_state_defaults_to_online() {
    let monitor = NetworkMonitor::new(None);
    assert!(monitor.is_online());
  }

  #[test]
  fn subscribers_see_current_state_immediately() {
    let monitor = NetworkMonitor::new(Some(false));
    let rx = monitor.subscribe();
    assert!(!*rx.borrow());
  }

  #[tokio::test]
  async fn transitions_reach_subscribers() {
    let monitor = NetworkMonitor::new(Some(true));
    let mut rx = monitor.subscribe();

    monitor.set_online(false);
    rx.changed().await.unwrap();
    assert!(!*rx.borrow());

    monitor.set_online(true);
    rx.changed().await.unwrap();
    assert!(*rx.borrow());
  }

  #[tokio::test]
  async fn redundant_updates_do_not_signal() {
    let monitor = NetworkMonitor::new(Some(true));
    let mut rx = monitor.subscribe();
    rx.borrow_and_update();

    monitor.set_online(true);
    assert!(!rx.has_changed().unwrap());
  }

  struct FakeProvider {
    state: Option<bool>,
    rx: mpsc::UnboundedReceiver<bool>,
  }

  impl ConnectivityProvider for FakeProvider {
    fn current(&self) -> Option<bool> {
      self.state
    }

    fn changes(self) -> mpsc::UnboundedReceiver<bool> {
      self.rx
    }
  }

  #[tokio::test]
  async fn bridged_provider_feeds_the_monitor() {
    let (tx, rx) = mpsc::unbounded_channel();
    let provider = FakeProvider {
      state: Some(false),
      rx,
    };

    let monitor = NetworkMonitor::new(None);
    let task = monitor.drive(provider);
    assert!(!monitor.is_online());

    let mut sub = monitor.subscribe();
    tx.send(true).unwrap();
    sub.changed().await.unwrap();
    assert!(monitor.is_online());

    drop(tx);
    task.await.unwrap();
  }
}
