//! Response storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::params;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::db::Database;
use crate::net::HttpResponse;

/// A stored response.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub url: String,
  pub response: HttpResponse,
  /// When the response was stored
  pub cached_at: DateTime<Utc>,
}

/// Trait for named-bucket response storage backends.
pub trait ResponseStorage: Send + Sync {
  /// Store a response under `url`, replacing any previous one in the bucket.
  fn put(&self, cache_name: &str, url: &str, response: &HttpResponse) -> Result<()>;

  /// Look up `url` in one bucket.
  fn lookup(&self, cache_name: &str, url: &str) -> Result<Option<CachedResponse>>;

  /// Look up `url` across every bucket, newest entry first.
  fn lookup_any(&self, url: &str) -> Result<Option<CachedResponse>>;

  /// Names of all buckets holding at least one entry.
  fn cache_names(&self) -> Result<Vec<String>>;

  /// Drop a whole bucket. Returns whether anything was deleted.
  fn delete_cache(&self, cache_name: &str) -> Result<bool>;

  /// Number of entries in a bucket.
  fn entry_count(&self, cache_name: &str) -> Result<usize>;
}

impl<S: ResponseStorage + ?Sized> ResponseStorage for Box<S> {
  fn put(&self, cache_name: &str, url: &str, response: &HttpResponse) -> Result<()> {
    (**self).put(cache_name, url, response)
  }

  fn lookup(&self, cache_name: &str, url: &str) -> Result<Option<CachedResponse>> {
    (**self).lookup(cache_name, url)
  }

  fn lookup_any(&self, url: &str) -> Result<Option<CachedResponse>> {
    (**self).lookup_any(url)
  }

  fn cache_names(&self) -> Result<Vec<String>> {
    (**self).cache_names()
  }

  fn delete_cache(&self, cache_name: &str) -> Result<bool> {
    (**self).delete_cache(cache_name)
  }

  fn entry_count(&self, cache_name: &str) -> Result<usize> {
    (**self).entry_count(cache_name)
  }
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl ResponseStorage for NoopStorage {
  fn put(&self, _cache_name: &str, _url: &str, _response: &HttpResponse) -> Result<()> {
    Ok(()) // Discard
  }

  fn lookup(&self, _cache_name: &str, _url: &str) -> Result<Option<CachedResponse>> {
    Ok(None) // Always miss
  }

  fn lookup_any(&self, _url: &str) -> Result<Option<CachedResponse>> {
    Ok(None) // Always miss
  }

  fn cache_names(&self) -> Result<Vec<String>> {
    Ok(Vec::new())
  }

  fn delete_cache(&self, _cache_name: &str) -> Result<bool> {
    Ok(false)
  }

  fn entry_count(&self, _cache_name: &str) -> Result<usize> {
    Ok(0)
  }
}

/// SQLite-based response storage.
pub struct SqliteResponseStorage {
  db: Arc<Database>,
}

impl SqliteResponseStorage {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }
}

/// SHA256 of the URL, for stable fixed-length keys
fn url_key(url: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(url.as_bytes());
  hex::encode(hasher.finalize())
}

type Row = (String, u16, String, Vec<u8>, String);

fn decode_row((url, status, headers, body, cached_at): Row) -> Result<CachedResponse> {
  let headers: BTreeMap<String, String> =
    serde_json::from_str(&headers).map_err(|e| eyre!("Failed to decode cached headers: {}", e))?;

  Ok(CachedResponse {
    url,
    response: HttpResponse {
      status,
      headers,
      body,
    },
    cached_at: parse_datetime(&cached_at)?,
  })
}

impl ResponseStorage for SqliteResponseStorage {
  fn put(&self, cache_name: &str, url: &str, response: &HttpResponse) -> Result<()> {
    let conn = self.db.conn()?;
    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO response_cache (cache_name, url_hash, url, status, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
        params![cache_name, url_key(url), url, response.status, headers, response.body],
      )
      .map_err(|e| eyre!("Failed to store response for {}: {}", url, e))?;

    Ok(())
  }

  fn lookup(&self, cache_name: &str, url: &str) -> Result<Option<CachedResponse>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare(
        "SELECT url, status, headers, body, cached_at FROM response_cache
         WHERE cache_name = ? AND url_hash = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<Row> = stmt
      .query_row(params![cache_name, url_key(url)], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
      })
      .ok();

    row.map(decode_row).transpose()
  }

  fn lookup_any(&self, url: &str) -> Result<Option<CachedResponse>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare(
        "SELECT url, status, headers, body, cached_at FROM response_cache
         WHERE url_hash = ?
         ORDER BY cached_at DESC
         LIMIT 1",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<Row> = stmt
      .query_row(params![url_key(url)], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
      })
      .ok();

    row.map(decode_row).transpose()
  }

  fn cache_names(&self) -> Result<Vec<String>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT DISTINCT cache_name FROM response_cache ORDER BY cache_name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(names)
  }

  fn delete_cache(&self, cache_name: &str) -> Result<bool> {
    let conn = self.db.conn()?;
    let deleted = conn
      .execute(
        "DELETE FROM response_cache WHERE cache_name = ?",
        params![cache_name],
      )
      .map_err(|e| eyre!("Failed to delete cache {}: {}", cache_name, e))?;

    Ok(deleted > 0)
  }

  fn entry_count(&self, cache_name: &str) -> Result<usize> {
    let conn = self.db.conn()?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM response_cache WHERE cache_name = ?",
        params![cache_name],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count cache entries: {}", e))?;

    Ok(count as usize)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
