//! Online/offline tracking.
//!
//! [`ConnectivityMonitor`] does no I/O. Platform code (or [`ConnectivityProbe`])
//! reports the current state through [`ConnectivityMonitor::set_online`] and
//! the monitor notifies listeners when the state actually changes.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

type Listener = Arc<dyn Fn(bool) + Send + Sync>;

/// Handle returned by [`ConnectivityMonitor::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[must_use = "dropping the token makes the listener impossible to unregister"]
pub struct UnregisterToken(u64);

struct MonitorInner {
  state: watch::Sender<bool>,
  listeners: Mutex<Vec<(u64, Listener)>>,
  next_id: AtomicU64,
}

/// Event source for connectivity transitions.
#[derive(Clone)]
pub struct ConnectivityMonitor {
  inner: Arc<MonitorInner>,
}

impl ConnectivityMonitor {
  pub fn new(initially_online: bool) -> Self {
    let (state, _) = watch::channel(initially_online);
    Self {
      inner: Arc::new(MonitorInner {
        state,
        listeners: Mutex::new(Vec::new()),
        next_id: AtomicU64::new(0),
      }),
    }
  }

  /// Last reported state.
  pub fn is_online(&self) -> bool {
    *self.inner.state.borrow()
  }

  /// Report the platform's current state. Listeners run only if it differs
  /// from the previous one. Returns whether a transition happened.
  pub fn set_online(&self, online: bool) -> bool {
    let changed = self.inner.state.send_if_modified(|current| {
      if *current == online {
        false
      } else {
        *current = online;
        true
      }
    });

    if changed {
      tracing::info!(online, "connectivity changed");
      let listeners: Vec<Listener> = match self.inner.listeners.lock() {
        Ok(guard) => guard.iter().map(|(_, l)| Arc::clone(l)).collect(),
        Err(e) => {
          tracing::error!("connectivity listener lock poisoned: {}", e);
          Vec::new()
        }
      };
      for listener in listeners {
        listener(online);
      }
    }
    changed
  }

  /// Call `listener` with the new state on every transition.
  pub fn register<F>(&self, listener: F) -> UnregisterToken
  where
    F: Fn(bool) + Send + Sync + 'static,
  {
    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
    if let Ok(mut listeners) = self.inner.listeners.lock() {
      listeners.push((id, Arc::new(listener)));
    }
    UnregisterToken(id)
  }

  /// Alias for [`ConnectivityMonitor::register`].
  pub fn on_change<F>(&self, callback: F) -> UnregisterToken
  where
    F: Fn(bool) + Send + Sync + 'static,
  {
    self.register(callback)
  }

  /// Returns whether the listener was still registered.
  pub fn unregister(&self, token: UnregisterToken) -> bool {
    match self.inner.listeners.lock() {
      Ok(mut listeners) => {
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != token.0);
        listeners.len() != before
      }
      Err(_) => false,
    }
  }

  /// Receiver that wakes on every transition.
  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.inner.state.subscribe()
  }
}

impl Default for ConnectivityMonitor {
  fn default() -> Self {
    Self::new(true)
  }
}

impl std::fmt::Debug for ConnectivityMonitor {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ConnectivityMonitor")
      .field("online", &self.is_online())
      .finish_non_exhaustive()
  }
}

/// A way of checking whether the remote can be reached right now.
#[async_trait]
pub trait Reachability: Send + Sync {
  async fn is_reachable(&self) -> bool;
}

/// Background task that polls a [`Reachability`] check and feeds the result
/// into a monitor.
pub struct ConnectivityProbe {
  handle: JoinHandle<()>,
}

impl ConnectivityProbe {
  pub fn spawn<R>(monitor: ConnectivityMonitor, reachability: R, every: Duration) -> Self
  where
    R: Reachability + 'static,
  {
    let handle = tokio::spawn(async move {
      let mut ticker = tokio::time::interval(every);
      ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
      loop {
        ticker.tick().await;
        let online = reachability.is_reachable().await;
        monitor.set_online(online);
      }
    });

    Self { handle }
  }

  pub fn stop(self) {
    self.handle.abort();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicBool, AtomicUsize};

  #[test]
  fn test_listener_fires_only_on_transitions() {
    let monitor = ConnectivityMonitor::new(true);
    let calls = Arc::new(Mutex::new(Vec::new()));
    let seen = calls.clone();
    let _token = monitor.register(move |online| seen.lock().unwrap().push(online));

    assert!(!monitor.set_online(true));
    assert!(monitor.set_online(false));
    assert!(!monitor.set_online(false));
    assert!(monitor.set_online(true));

    assert_eq!(*calls.lock().unwrap(), vec![false, true]);
    assert!(monitor.is_online());
  }

  #[test]
  fn test_unregister_stops_notifications() {
    let monitor = ConnectivityMonitor::new(false);
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    let token = monitor.on_change(move |_| {
      counter.fetch_add(1, Ordering::SeqCst);
    });

    monitor.set_online(true);
    assert!(monitor.unregister(token));
    assert!(!monitor.unregister(token));
    monitor.set_online(false);

    assert_eq!(count.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_subscribers_see_changes() {
    let monitor = ConnectivityMonitor::new(true);
    let mut rx = monitor.subscribe();

    monitor.set_online(false);
    rx.changed().await.unwrap();
    assert!(!*rx.borrow_and_update());
  }

  struct Flip(Arc<AtomicBool>);

  #[async_trait]
  impl Reachability for Flip {
    async fn is_reachable(&self) -> bool {
      self.0.load(Ordering::SeqCst)
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_probe_reports_reachability() {
    let monitor = ConnectivityMonitor::new(true);
    let reachable = Arc::new(AtomicBool::new(false));
    let probe = ConnectivityProbe::spawn(
      monitor.clone(),
      Flip(reachable.clone()),
      Duration::from_secs(10),
    );

    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(!monitor.is_online());

    reachable.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(monitor.is_online());

    probe.stop();
  }
}
