//! Flat key-value file: the degraded persistence mechanism.
//!
//! All keys live in one JSON object on disk. Every write rewrites the file
//! through a uniquely named temporary sibling and a rename, so a crash leaves
//! either the old or the new contents. A sibling `.lock` file carries an
//! advisory lock so `serve` and one-shot CLI commands can share the store.

use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub struct KvStore {
  path: PathBuf,
  lock_path: PathBuf,
}

impl KvStore {
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create key-value directory: {}", e))?;
    }

    Ok(Self {
      path: path.to_path_buf(),
      lock_path: path.with_extension("lock"),
    })
  }

  pub fn get(&self, key: &str) -> Result<Option<String>> {
    let lock = self.lock_file()?;
    lock
      .lock_shared()
      .map_err(|e| eyre!("Failed to lock {}: {}", self.lock_path.display(), e))?;
    Ok(self.read_all()?.remove(key))
  }

  pub fn set(&self, key: &str, value: &str) -> Result<()> {
    self.update(key, |_| Ok(Some(value.to_string())))
  }

  /// Read-modify-write a single key under the exclusive file lock.
  ///
  /// Returning `None` from `f` deletes the key.
  pub fn update<F>(&self, key: &str, f: F) -> Result<()>
  where
    F: FnOnce(Option<String>) -> Result<Option<String>>,
  {
    let lock = self.lock_file()?;
    lock
      .lock()
      .map_err(|e| eyre!("Failed to lock {}: {}", self.lock_path.display(), e))?;

    let mut entries = self.read_all()?;
    if let Some(value) = f(entries.remove(key))? {
      entries.insert(key.to_string(), value);
    }
    self.write_all(&entries)
  }

  /// The lock is released when the returned handle is dropped.
  fn lock_file(&self) -> Result<File> {
    OpenOptions::new()
      .create(true)
      .truncate(false)
      .write(true)
      .open(&self.lock_path)
      .map_err(|e| eyre!("Failed to open {}: {}", self.lock_path.display(), e))
  }

  /// A file that exists but doesn't parse is an error, never an empty store:
  /// the next write would otherwise replace it.
  fn read_all(&self) -> Result<BTreeMap<String, String>> {
    match std::fs::read(&self.path) {
      Ok(data) if data.is_empty() => Ok(BTreeMap::new()),
      Ok(data) => serde_json::from_slice(&data)
        .map_err(|e| eyre!("Key-value file {} is unreadable: {}", self.path.display(), e)),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
      Err(e) => Err(eyre!("Failed to read {}: {}", self.path.display(), e)),
    }
  }

  fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<()> {
    let data =
      serde_json::to_vec_pretty(entries).map_err(|e| eyre!("Failed to serialize entries: {}", e))?;
    let dir = self
      .path
      .parent()
      .filter(|p| !p.as_os_str().is_empty())
      .unwrap_or_else(|| Path::new("."));

    let mut tmp = NamedTempFile::new_in(dir)
      .map_err(|e| eyre!("Failed to create temporary file in {}: {}", dir.display(), e))?;
    tmp
      .write_all(&data)
      .and_then(|_| tmp.as_file().sync_all())
      .map_err(|e| eyre!("Failed to write {}: {}", tmp.path().display(), e))?;
    tmp
      .persist(&self.path)
      .map_err(|e| eyre!("Failed to replace {}: {}", self.path.display(), e))?;

    Ok(())
  }
}
