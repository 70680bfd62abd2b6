use color_eyre::{eyre::eyre, Result};
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::StorageConfig;
use crate::event::{EventSender, SyncEvent};

use super::action::{NewAction, PendingAction};
use super::store::ActionStore;

/// Which backend the queue writes to first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendChoice {
  /// Structured store available; the key-value file only catches failed writes
  Primary { name: &'static str },
  /// Structured store unavailable or disabled
  FallbackOnly { reason: String },
}

/// Outcome of [`select_backend`]
pub struct BackendSelection {
  pub primary: Option<Arc<dyn ActionStore>>,
  pub choice: BackendChoice,
}

/// Decide the primary backend once, at startup.
pub fn select_backend<F>(config: &StorageConfig, open_primary: F) -> BackendSelection
where
  F: FnOnce() -> Result<Arc<dyn ActionStore>>,
{
  let selection = if config.force_fallback {
    BackendSelection {
      primary: None,
      choice: BackendChoice::FallbackOnly {
        reason: "disabled by configuration".to_string(),
      },
    }
  } else {
    match open_primary() {
      Ok(store) => BackendSelection {
        choice: BackendChoice::Primary { name: store.name() },
        primary: Some(store),
      },
      Err(e) => BackendSelection {
        primary: None,
        choice: BackendChoice::FallbackOnly {
          reason: e.to_string(),
        },
      },
    }
  };

  match &selection.choice {
    BackendChoice::Primary { name } => tracing::info!(backend = *name, "action store selected"),
    BackendChoice::FallbackOnly { reason } => {
      tracing::warn!(reason = %reason, "action store degraded to key-value fallback")
    }
  }

  selection
}

/// The durable action queue.
#[derive(Clone)]
pub struct ActionQueue {
  primary: Option<Arc<dyn ActionStore>>,
  fallback: Arc<dyn ActionStore>,
  choice: BackendChoice,
  trigger: Option<EventSender>,
}

impl ActionQueue {
  pub fn new(selection: BackendSelection, fallback: Arc<dyn ActionStore>) -> Self {
    Self {
      primary: selection.primary,
      fallback,
      choice: selection.choice,
      trigger: None,
    }
  }

  /// Raise `ActionQueued` on this channel after every successful enqueue.
  pub fn with_trigger(mut self, trigger: EventSender) -> Self {
    self.trigger = Some(trigger);
    self
  }

  pub fn backend(&self) -> &BackendChoice {
    &self.choice
  }

  /// Stamp and persist an action.
  ///
  /// A primary write failure is logged and the record goes to the fallback
  /// store; only a failure of both is returned.
  pub fn enqueue(&self, action: NewAction) -> Result<PendingAction> {
    let action = PendingAction::stamp(action);

    let stored_in = match &self.primary {
      Some(primary) => match primary.insert(&action) {
        Ok(()) => primary.name(),
        Err(e) => {
          tracing::warn!(id = %action.id, error = %e, "primary action store write failed, using fallback");
          self.insert_fallback(&action)?
        }
      },
      None => self.insert_fallback(&action)?,
    };

    tracing::info!(id = %action.id, kind = %action.kind, backend = stored_in, "action queued");
    self.request_sync();
    Ok(action)
  }

  fn insert_fallback(&self, action: &PendingAction) -> Result<&'static str> {
    self
      .fallback
      .insert(action)
      .map_err(|e| eyre!("Failed to queue action {}: {}", action.id, e))?;
    Ok(self.fallback.name())
  }

  fn request_sync(&self) {
    match &self.trigger {
      Some(tx) => {
        if tx.send(SyncEvent::ActionQueued).is_err() {
          tracing::warn!("sync trigger closed; action will wait for the next sync");
        }
      }
      None => tracing::debug!("no sync trigger registered"),
    }
  }

  /// Every queued action from both backends. Order is unspecified.
  pub fn list_all(&self) -> Vec<PendingAction> {
    let mut seen = HashSet::new();
    let mut actions = Vec::new();

    for store in self.stores() {
      match store.list() {
        Ok(list) => actions.extend(list.into_iter().filter(|a| seen.insert(a.id.clone()))),
        Err(e) => tracing::warn!(backend = store.name(), error = %e, "failed to read queued actions"),
      }
    }

    actions
  }

  /// Remove an action from every backend. Unknown ids are fine.
  ///
  /// Any backend failing is an error: the record may still be there and
  /// would be replayed again.
  pub fn remove(&self, id: &str) -> Result<()> {
    let mut failures = Vec::new();

    for store in self.stores() {
      if let Err(e) = store.remove(id) {
        tracing::warn!(id = %id, backend = store.name(), error = %e, "failed to remove action");
        failures.push(format!("{}: {}", store.name(), e));
      }
    }

    if !failures.is_empty() {
      return Err(eyre!("Failed to remove action {}: {}", id, failures.join("; ")));
    }

    tracing::debug!(id = %id, "action removed");
    Ok(())
  }

  fn stores(&self) -> Vec<&Arc<dyn ActionStore>> {
    self.primary.iter().chain(std::iter::once(&self.fallback)).collect()
  }
}
