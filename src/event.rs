use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::net::{HttpRequest, Transport};
use crate::queue::ActionQueue;

/// Reasons to attempt a drain pass (plus connectivity loss, which only gets reported)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
  /// A new action was written to the queue, by this process or another one
  ActionQueued,
  /// Periodic sync interval elapsed
  PeriodicTick,
  /// The server became reachable again
  ConnectivityRestored,
  /// The server stopped answering
  ConnectivityLost,
  /// Explicit request from the operator
  Manual,
}

pub type EventSender = mpsc::UnboundedSender<SyncEvent>;

/// Event handler that multiplexes every trigger source onto one channel
pub struct EventHandler {
  tx: EventSender,
  rx: mpsc::UnboundedReceiver<SyncEvent>,
  tasks: Vec<JoinHandle<()>>,
}

impl Default for EventHandler {
  fn default() -> Self {
    Self::new()
  }
}

impl EventHandler {
  pub fn new() -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    Self {
      tx,
      rx,
      tasks: Vec::new(),
    }
  }

  /// Sender for components that raise events themselves (the action queue)
  pub fn sender(&self) -> EventSender {
    self.tx.clone()
  }

  /// Emit `PeriodicTick` every `period`. A zero period leaves periodic sync off.
  pub fn start_periodic(&mut self, period: Duration) {
    if period.is_zero() {
      tracing::info!("periodic sync disabled");
      return;
    }

    let tx = self.tx.clone();
    self.tasks.push(tokio::spawn(async move {
      let mut ticker = interval_at(Instant::now() + period, period);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      loop {
        ticker.tick().await;
        if tx.send(SyncEvent::PeriodicTick).is_err() {
          break;
        }
      }
    }));
    tracing::info!(period_secs = period.as_secs(), "periodic sync registered");
  }

  /// Probe `health` every `period` and report reachability transitions.
  ///
  /// Any HTTP response counts as reachable. If the probe request itself is
  /// malformed the monitor stops; the other triggers keep working.
  pub fn start_connectivity_monitor(
    &mut self,
    transport: Arc<dyn Transport>,
    health: HttpRequest,
    period: Duration,
  ) {
    if period.is_zero() {
      tracing::warn!("connectivity monitor not started: zero probe interval");
      return;
    }

    let tx = self.tx.clone();
    self.tasks.push(tokio::spawn(async move {
      let mut state = Connectivity::default();
      let mut ticker = tokio::time::interval(period);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      loop {
        ticker.tick().await;
        let online = match transport.send(&health).await {
          Ok(_) => true,
          Err(e) if e.is_offline() => false,
          Err(e) => {
            tracing::warn!(url = %health.url, error = %e, "connectivity monitor stopped");
            break;
          }
        };

        if let Some(event) = state.observe(online) {
          if tx.send(event).is_err() {
            break;
          }
        }
      }
    }));
    tracing::info!(period_secs = period.as_secs(), "connectivity monitor registered");
  }

  /// Re-read the queue every `period` and emit `ActionQueued` when an id
  /// shows up that wasn't there before.
  ///
  /// Catches actions written by other processes sharing the data directory
  /// (CLI `enqueue`, `submit`). The baseline is taken before this returns.
  pub fn start_queue_watch(&mut self, queue: ActionQueue, period: Duration) {
    if period.is_zero() {
      tracing::info!("queue watch disabled");
      return;
    }

    let mut known = queued_ids(&queue);
    let tx = self.tx.clone();
    self.tasks.push(tokio::spawn(async move {
      let mut ticker = interval_at(Instant::now() + period, period);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      loop {
        ticker.tick().await;
        let current = queued_ids(&queue);
        let arrived = current.difference(&known).count();
        known = current;

        if arrived > 0 {
          tracing::debug!(arrived, "new actions found in the queue");
          if tx.send(SyncEvent::ActionQueued).is_err() {
            break;
          }
        }
      }
    }));
    tracing::info!(period_ms = period.as_millis() as u64, "queue watch registered");
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<SyncEvent> {
    self.rx.recv().await
  }

  /// Stop all trigger sources. Events already queued stay readable.
  pub fn shutdown(&mut self) {
    for task in self.tasks.drain(..) {
      task.abort();
    }
  }
}

impl Drop for EventHandler {
  fn drop(&mut self) {
    self.shutdown();
  }
}

fn queued_ids(queue: &ActionQueue) -> HashSet<String> {
  queue.list_all().into_iter().map(|a| a.id).collect()
}

/// Edge detector for probe results.
///
/// The first observation only sets the baseline.
#[derive(Debug, Default)]
struct Connectivity {
  online: Option<bool>,
}

impl Connectivity {
  fn observe(&mut self, online: bool) -> Option<SyncEvent> {
    let previous = self.online.replace(online);
    match (previous, online) {
      (Some(false), true) => Some(SyncEvent::ConnectivityRestored),
      (Some(true), false) | (None, false) => Some(SyncEvent::ConnectivityLost),
      _ => None,
    }
  }
}
