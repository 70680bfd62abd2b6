//! Action store trait with the SQLite and flat key-value implementations.

use color_eyre::{eyre::eyre, Result};
use rusqlite::params;
use serde_json::Value;
use std::sync::Arc;

use crate::db::Database;
use crate::kv::KvStore;

use super::action::PendingAction;

/// Key under which the key-value store keeps the whole action list
const KV_ACTIONS_KEY: &str = "offlineActions";

/// Persistence backend for pending actions.
pub trait ActionStore: Send + Sync {
  /// Short backend name for logs ("sqlite", "kv")
  fn name(&self) -> &'static str;

  /// Write one record.
  fn insert(&self, action: &PendingAction) -> Result<()>;

  /// All records, in no particular order.
  fn list(&self) -> Result<Vec<PendingAction>>;

  /// Delete by id. Unknown ids are not an error.
  fn remove(&self, id: &str) -> Result<()>;
}

/// Primary store: one row per action in the shared database.
pub struct SqliteActionStore {
  db: Arc<Database>,
}

impl SqliteActionStore {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }
}

impl ActionStore for SqliteActionStore {
  fn name(&self) -> &'static str {
    "sqlite"
  }

  fn insert(&self, action: &PendingAction) -> Result<()> {
    let conn = self.db.conn()?;
    let data =
      serde_json::to_vec(action).map_err(|e| eyre!("Failed to serialize action: {}", e))?;

    conn
      .execute(
        "INSERT INTO pending_actions (id, type, data, timestamp) VALUES (?, ?, ?, ?)",
        params![action.id, action.kind, data, action.timestamp.to_rfc3339()],
      )
      .map_err(|e| eyre!("Failed to store action {}: {}", action.id, e))?;

    Ok(())
  }

  fn list(&self) -> Result<Vec<PendingAction>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT id, data FROM pending_actions")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(String, Vec<u8>)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
      .map_err(|e| eyre!("Failed to query actions: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    let actions = rows
      .into_iter()
      .filter_map(|(id, data)| match serde_json::from_slice(&data) {
        Ok(action) => Some(action),
        Err(e) => {
          tracing::warn!(id = %id, error = %e, "skipping undecodable pending action");
          None
        }
      })
      .collect();

    Ok(actions)
  }

  fn remove(&self, id: &str) -> Result<()> {
    let conn = self.db.conn()?;
    conn
      .execute("DELETE FROM pending_actions WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to delete action {}: {}", id, e))?;
    Ok(())
  }
}

/// Degraded store: the whole list serialized under one key-value entry.
pub struct KvActionStore {
  kv: Arc<KvStore>,
}

impl KvActionStore {
  pub fn new(kv: Arc<KvStore>) -> Self {
    Self { kv }
  }
}

/// Stored entries, kept as raw JSON so a record this build can't decode
/// survives every rewrite of the list.
fn decode_entries(raw: Option<String>) -> Result<Vec<Value>> {
  match raw {
    Some(s) => serde_json::from_str(&s).map_err(|e| eyre!("Stored action list is unreadable: {}", e)),
    None => Ok(Vec::new()),
  }
}

fn encode_entries(entries: &[Value]) -> Result<Option<String>> {
  serde_json::to_string(entries)
    .map(Some)
    .map_err(|e| eyre!("Failed to serialize actions: {}", e))
}

fn entry_id(entry: &Value) -> Option<&str> {
  entry.get("id").and_then(Value::as_str)
}

impl ActionStore for KvActionStore {
  fn name(&self) -> &'static str {
    "kv"
  }

  fn insert(&self, action: &PendingAction) -> Result<()> {
    let entry =
      serde_json::to_value(action).map_err(|e| eyre!("Failed to serialize action: {}", e))?;
    self.kv.update(KV_ACTIONS_KEY, |raw| {
      let mut entries = decode_entries(raw)?;
      entries.push(entry);
      encode_entries(&entries)
    })
  }

  fn list(&self) -> Result<Vec<PendingAction>> {
    let entries = decode_entries(self.kv.get(KV_ACTIONS_KEY)?)?;

    let actions = entries
      .into_iter()
      .filter_map(|entry| {
        let id = entry_id(&entry).unwrap_or("?").to_string();
        match serde_json::from_value(entry) {
          Ok(action) => Some(action),
          Err(e) => {
            tracing::warn!(id = %id, error = %e, "skipping undecodable pending action");
            None
          }
        }
      })
      .collect();

    Ok(actions)
  }

  fn remove(&self, id: &str) -> Result<()> {
    self.kv.update(KV_ACTIONS_KEY, |raw| {
      let mut entries = decode_entries(raw)?;
      entries.retain(|entry| entry_id(entry) != Some(id));
      encode_entries(&entries)
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::queue::action::NewAction;
  use serde_json::json;

  fn borrow() -> PendingAction {
    PendingAction::stamp(NewAction::json(
      "borrow",
      "POST",
      "/api/transactions/borrow",
      json!({"isbn": "123", "school_no": "42"}),
    ))
  }

  fn exercise(store: &dyn ActionStore) {
    let a = borrow();
    let b = borrow();
    store.insert(&a).unwrap();
    store.insert(&b).unwrap();

    let mut ids: Vec<String> = store.list().unwrap().into_iter().map(|x| x.id).collect();
    ids.sort();
    let mut expected = vec![a.id.clone(), b.id.clone()];
    expected.sort();
    assert_eq!(ids, expected);

    store.remove(&a.id).unwrap();
    store.remove(&a.id).unwrap();
    store.remove("no-such-id").unwrap();

    let left = store.list().unwrap();
    assert_eq!(left, vec![b]);
  }

  #[test]
  fn sqlite_store_contract() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    exercise(&SqliteActionStore::new(db));
  }

  #[test]
  fn kv_store_contract() {
    let dir = tempfile::tempdir().unwrap();
    let kv = Arc::new(KvStore::open(&dir.path().join("kv.json")).unwrap());
    exercise(&KvActionStore::new(kv));
  }

  #[test]
  fn sqlite_rejects_duplicate_id() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let store = SqliteActionStore::new(db);
    let a = borrow();

    store.insert(&a).unwrap();
    assert!(store.insert(&a).is_err());
  }

  #[test]
  fn kv_store_keeps_records_it_cannot_decode() {
    let dir = tempfile::tempdir().unwrap();
    let kv = Arc::new(KvStore::open(&dir.path().join("kv.json")).unwrap());
    let store = KvActionStore::new(Arc::clone(&kv));
    let first = borrow();
    store.insert(&first).unwrap();

    // An older record without a timestamp
    kv.update(KV_ACTIONS_KEY, |raw| {
      let mut entries: Vec<Value> = serde_json::from_str(&raw.unwrap()).unwrap();
      entries.push(json!({"id": "legacy-1", "type": "borrow", "url": "/api/x", "method": "POST"}));
      Ok(Some(serde_json::to_string(&entries).unwrap()))
    })
    .unwrap();

    let second = borrow();
    store.insert(&second).unwrap();
    let ids: Vec<String> = store.list().unwrap().into_iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![first.id.clone(), second.id.clone()]);

    store.remove(&first.id).unwrap();
    let raw: Vec<Value> = serde_json::from_str(&kv.get(KV_ACTIONS_KEY).unwrap().unwrap()).unwrap();
    let raw_ids: Vec<&str> = raw.iter().filter_map(entry_id).collect();
    assert_eq!(raw_ids, vec!["legacy-1", second.id.as_str()]);
  }

  #[test]
  fn kv_store_refuses_to_rewrite_an_unreadable_list() {
    let dir = tempfile::tempdir().unwrap();
    let kv = Arc::new(KvStore::open(&dir.path().join("kv.json")).unwrap());
    kv.set(KV_ACTIONS_KEY, "{\"not\": \"a list\"}").unwrap();
    let store = KvActionStore::new(Arc::clone(&kv));

    assert!(store.insert(&borrow()).is_err());
    assert!(store.list().is_err());
    assert_eq!(
      kv.get(KV_ACTIONS_KEY).unwrap().as_deref(),
      Some("{\"not\": \"a list\"}")
    );
  }

  #[test]
  fn kv_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kv.json");
    let a = borrow();

    KvActionStore::new(Arc::new(KvStore::open(&path).unwrap()))
      .insert(&a)
      .unwrap();
    let reopened = KvActionStore::new(Arc::new(KvStore::open(&path).unwrap()));

    assert_eq!(reopened.list().unwrap(), vec![a]);
  }
}
