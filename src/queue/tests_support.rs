//! Fixtures shared by the queue and sync tests.

use color_eyre::{eyre::eyre, Result};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

use crate::config::StorageConfig;
use crate::db::Database;
use crate::kv::KvStore;

use super::{
  select_backend, ActionQueue, ActionStore, KvActionStore, NewAction, PendingAction,
  SqliteActionStore,
};

/// A backend whose every call fails, standing in for a broken database
pub struct BrokenStore;

impl ActionStore for BrokenStore {
  fn name(&self) -> &'static str {
    "broken"
  }

  fn insert(&self, _action: &PendingAction) -> Result<()> {
    Err(eyre!("disk I/O error"))
  }

  fn list(&self) -> Result<Vec<PendingAction>> {
    Err(eyre!("disk I/O error"))
  }

  fn remove(&self, _id: &str) -> Result<()> {
    Err(eyre!("disk I/O error"))
  }
}

pub fn borrow_action() -> NewAction {
  NewAction::json(
    "borrow",
    "POST",
    "/api/transactions/borrow",
    json!({"isbn": "123", "school_no": "42"}),
  )
}

/// SQLite primary in memory plus a key-value fallback in `dir`
pub fn sqlite_queue(dir: &Path) -> ActionQueue {
  let db = Arc::new(Database::open_in_memory().unwrap());
  let selection = select_backend(&StorageConfig::default(), || {
    Ok(Arc::new(SqliteActionStore::new(db)) as Arc<dyn ActionStore>)
  });
  ActionQueue::new(selection, kv_store(dir))
}

pub fn kv_store(dir: &Path) -> Arc<dyn ActionStore> {
  let kv = Arc::new(KvStore::open(&dir.join("kv.json")).unwrap());
  Arc::new(KvActionStore::new(kv))
}
