//! Replay of pending actions against the remote.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::clock::{system_clock, SharedClock};
use crate::connectivity::ConnectivityMonitor;
use crate::error::{ApplyError, Result};
use crate::queue::{ActionQueue, PendingAction};
use crate::remote::{ActionApplier, ErrorReporter, LogReporter};
use crate::settings::{Settings, LAST_SYNC_AT};

use super::backoff::Backoff;

/// Where the driver is in its replay cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
  Idle,
  Draining,
  /// Some targets hit a retryable failure; next attempt after `retry_in`.
  Backoff { retry_in: Duration },
}

/// Summary of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
  /// Actions the remote accepted
  pub applied: usize,
  /// Actions the remote rejected for good; marked synced and reported
  pub permanent_failures: usize,
  /// Targets whose remaining actions were held back after a retryable failure
  pub stalled_targets: Vec<String>,
  /// Unsynced actions left after the pass
  pub remaining: usize,
  /// The pass stopped early (cancelled or connectivity lost)
  pub cancelled: bool,
}

/// Replays unsynced actions, preserving order per target.
pub struct SyncDriver<A: ActionApplier> {
  queue: ActionQueue,
  settings: Settings,
  applier: A,
  reporter: Arc<dyn ErrorReporter>,
  monitor: ConnectivityMonitor,
  clock: SharedClock,
  state: watch::Sender<SyncState>,
  backoff: Mutex<Backoff>,
  drain_lock: tokio::sync::Mutex<()>,
  cancel: AtomicBool,
  trigger: Notify,
}

impl<A: ActionApplier> SyncDriver<A> {
  pub fn new(
    queue: ActionQueue,
    settings: Settings,
    applier: A,
    monitor: ConnectivityMonitor,
  ) -> Self {
    let (state, _) = watch::channel(SyncState::Idle);
    Self {
      queue,
      settings,
      applier,
      reporter: Arc::new(LogReporter),
      monitor,
      clock: system_clock(),
      state,
      backoff: Mutex::new(Backoff::default()),
      drain_lock: tokio::sync::Mutex::new(()),
      cancel: AtomicBool::new(false),
      trigger: Notify::new(),
    }
  }

  pub fn with_reporter(mut self, reporter: impl ErrorReporter + 'static) -> Self {
    self.reporter = Arc::new(reporter);
    self
  }

  pub fn with_backoff(mut self, backoff: Backoff) -> Self {
    self.backoff = Mutex::new(backoff);
    self
  }

  pub fn with_clock(mut self, clock: SharedClock) -> Self {
    self.clock = clock;
    self
  }

  pub fn state(&self) -> SyncState {
    self.state.borrow().clone()
  }

  pub fn watch_state(&self) -> watch::Receiver<SyncState> {
    self.state.subscribe()
  }

  fn set_state(&self, next: SyncState) {
    self.state.send_if_modified(|current| {
      if *current == next {
        return false;
      }
      tracing::debug!(from = ?current, to = ?next, "sync state");
      *current = next;
      true
    });
  }

  /// Ask the background loop to drain now (pull-to-refresh).
  pub fn trigger(&self) {
    self.trigger.notify_one();
  }

  /// Stop the current drain after the in-flight action completes.
  pub fn cancel(&self) {
    self.cancel.store(true, Ordering::SeqCst);
  }

  fn should_stop(&self) -> bool {
    self.cancel.load(Ordering::SeqCst) || !self.monitor.is_online()
  }

  /// Run one drain pass over every unsynced action.
  ///
  /// Actions for the same target are applied in queue order. A retryable
  /// failure holds back the rest of that target's actions until the next
  /// pass; other targets keep going. Permanent failures are marked synced
  /// and handed to the error reporter so they never block the queue.
  /// Actions queued while the pass runs are picked up before it ends.
  ///
  /// A storage failure aborts the pass and leaves the driver in backoff so
  /// the background loop retries it.
  pub async fn drain(&self) -> Result<DrainReport> {
    let _guard = self.drain_lock.lock().await;
    self.cancel.store(false, Ordering::SeqCst);
    self.set_state(SyncState::Draining);

    let result = self.drain_pass().await;
    match &result {
      Ok(report) if !report.stalled_targets.is_empty() => {
        let retry_in = self.next_backoff();
        tracing::warn!(
          stalled = report.stalled_targets.len(),
          retry_in_ms = retry_in.as_millis() as u64,
          "drain paused targets after retryable failures"
        );
        self.set_state(SyncState::Backoff { retry_in });
      }
      Ok(report) => {
        if !report.cancelled {
          self.reset_backoff();
        }
        self.set_state(SyncState::Idle);
      }
      Err(e) => {
        let retry_in = self.next_backoff();
        tracing::warn!(
          error = %e,
          retry_in_ms = retry_in.as_millis() as u64,
          "drain aborted by storage failure"
        );
        self.set_state(SyncState::Backoff { retry_in });
      }
    }
    result
  }

  async fn drain_pass(&self) -> Result<DrainReport> {
    let mut report = DrainReport::default();
    let mut stalled: HashSet<String> = HashSet::new();

    // Every round either syncs an action or stalls its target, so this ends
    // once nothing outside the stalled targets is left.
    'rounds: loop {
      let pending: Vec<PendingAction> = self
        .queue
        .list_unsynced()?
        .into_iter()
        .filter(|action| !stalled.contains(&action.target_id))
        .collect();
      if pending.is_empty() {
        break;
      }

      tracing::info!(pending = pending.len(), "draining pending actions");

      for action in &pending {
        if self.should_stop() {
          report.cancelled = true;
          break 'rounds;
        }
        if stalled.contains(&action.target_id) {
          continue;
        }

        match self.applier.apply_action(action).await {
          Ok(_) => {
            self.queue.mark_synced(&action.id)?;
            report.applied += 1;
          }
          Err(error @ ApplyError::Permanent(_)) => {
            self.queue.mark_synced(&action.id)?;
            self.reporter.report(action, &error);
            report.permanent_failures += 1;
          }
          Err(error @ ApplyError::Retryable(_)) => {
            tracing::warn!(
              action_id = %action.id,
              target_id = %action.target_id,
              %error,
              "retryable failure, holding target"
            );
            stalled.insert(action.target_id.clone());
            report.stalled_targets.push(action.target_id.clone());
          }
        }
      }
    }

    if report.applied > 0 {
      if let Err(e) = self.settings.set(LAST_SYNC_AT, &self.clock.now_millis()) {
        tracing::warn!(error = %e, "failed to record last sync time");
      }
    }

    report.remaining = self.queue.pending_count()?;
    tracing::info!(
      applied = report.applied,
      permanent_failures = report.permanent_failures,
      remaining = report.remaining,
      cancelled = report.cancelled,
      "drain finished"
    );
    Ok(report)
  }

  fn next_backoff(&self) -> Duration {
    match self.backoff.lock() {
      Ok(mut backoff) => backoff.next_delay(),
      Err(e) => {
        tracing::error!("backoff lock poisoned: {}", e);
        Backoff::default().next_delay()
      }
    }
  }

  fn reset_backoff(&self) {
    if let Ok(mut backoff) = self.backoff.lock() {
      backoff.reset();
    }
  }
}

impl<A: ActionApplier + 'static> SyncDriver<A> {
  /// Run the driver in the background.
  ///
  /// It drains when connectivity comes back, when [`SyncDriver::trigger`]
  /// is called, and when a backoff delay elapses. An initial drain runs
  /// right away if the monitor reports online.
  pub fn spawn(self: Arc<Self>) -> SyncHandle {
    let shutdown = Arc::new(Notify::new());
    let stop = shutdown.clone();
    let driver = self;

    let handle = tokio::spawn(async move {
      let mut online = driver.monitor.subscribe();
      driver.trigger();

      loop {
        let retry_in = match driver.state() {
          SyncState::Backoff { retry_in } => Some(retry_in),
          _ => None,
        };
        let backoff_elapsed = async {
          match retry_in {
            Some(delay) => tokio::time::sleep(delay).await,
            None => std::future::pending().await,
          }
        };

        tokio::select! {
          _ = stop.notified() => break,
          _ = driver.trigger.notified() => {}
          changed = online.changed() => {
            if changed.is_err() {
              break;
            }
            if !*online.borrow_and_update() {
              continue;
            }
          }
          _ = backoff_elapsed => {}
        }

        if !driver.monitor.is_online() {
          continue;
        }
        if let Err(e) = driver.drain().await {
          tracing::warn!(error = %e, "background drain failed");
        }
      }

      tracing::debug!("sync driver stopped");
    });

    SyncHandle { shutdown, handle }
  }
}

/// Handle to a running background driver.
pub struct SyncHandle {
  shutdown: Arc<Notify>,
  handle: JoinHandle<()>,
}

impl SyncHandle {
  /// Stop the loop after any in-flight drain finishes.
  pub async fn shutdown(self) {
    self.shutdown.notify_one();
    if let Err(e) = self.handle.await {
      tracing::warn!(error = %e, "sync driver task ended abnormally");
    }
  }
}

/// Unsynced actions grouped by target, each group in replay order.
pub fn partition_by_target(actions: &[PendingAction]) -> Vec<(String, Vec<&PendingAction>)> {
  let mut groups: Vec<(String, Vec<&PendingAction>)> = Vec::new();
  for action in actions {
    match groups.iter_mut().find(|(target, _)| *target == action.target_id) {
      Some((_, group)) => group.push(action),
      None => groups.push((action.target_id.clone(), vec![action])),
    }
  }
  groups
}
