use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::net::Transport;
use crate::notify::{self, Notification, Notifier};
use crate::queue::{ActionQueue, PendingAction};

/// Replays in flight at once within a drain pass
const REPLAY_CONCURRENCY: usize = 4;

/// Counts from one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
  pub attempted: usize,
  pub replayed: usize,
  pub failed: usize,
}

/// Drains the action queue against the network.
pub struct SyncExecutor {
  queue: ActionQueue,
  transport: Arc<dyn Transport>,
  notifier: Arc<dyn Notifier>,
  /// Serializes passes so overlapping triggers don't replay the same action twice
  drain_lock: Mutex<()>,
}

impl SyncExecutor {
  pub fn new(queue: ActionQueue, transport: Arc<dyn Transport>, notifier: Arc<dyn Notifier>) -> Self {
    Self {
      queue,
      transport,
      notifier,
      drain_lock: Mutex::new(()),
    }
  }

  /// One drain pass over every queued action.
  ///
  /// A 2xx response removes the action and emits a notification. Anything
  /// else leaves it queued for the next trigger, as does a 2xx whose removal
  /// fails; that one counts as failed and is not announced. Actions are independent and
  /// may complete in any order.
  pub async fn drain(&self) -> DrainReport {
    let _pass = self.drain_lock.lock().await;

    let actions = self.queue.list_all();
    if actions.is_empty() {
      tracing::debug!("nothing to sync");
      return DrainReport::default();
    }

    let outcomes: Vec<bool> = stream::iter(actions.iter())
      .map(|action| self.replay(action))
      .buffer_unordered(REPLAY_CONCURRENCY)
      .collect()
      .await;

    let replayed = outcomes.iter().filter(|ok| **ok).count();
    let report = DrainReport {
      attempted: outcomes.len(),
      replayed,
      failed: outcomes.len() - replayed,
    };
    tracing::info!(
      attempted = report.attempted,
      replayed = report.replayed,
      failed = report.failed,
      "drain pass finished"
    );
    report
  }

  async fn replay(&self, action: &PendingAction) -> bool {
    match self.transport.send(&action.to_request()).await {
      Ok(response) if response.is_success() => match self.queue.remove(&action.id) {
        Ok(()) => {
          tracing::info!(id = %action.id, kind = %action.kind, "action synced");
          notify::report(self.notifier.as_ref(), Notification::sync_success(&action.kind));
          true
        }
        Err(e) => {
          tracing::warn!(id = %action.id, kind = %action.kind, error = %e, "action delivered but still queued");
          false
        }
      },
      Ok(response) => {
        tracing::warn!(id = %action.id, kind = %action.kind, status = response.status, "replay rejected, keeping action");
        false
      }
      Err(e) => {
        tracing::debug!(id = %action.id, kind = %action.kind, error = %e, "replay failed, keeping action");
        false
      }
    }
  }
}
