//! SQLite implementation of cache bucket storage.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use url::Url;

use super::traits::{BucketId, CacheEntry, CacheStorage, CachedEntry};
use crate::error::CacheError;
use crate::http::{header_pairs, headers_from_pairs, RequestKey, Response};

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open the cache database at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open(&Self::default_path()?)
  }

  /// Volatile storage, lost when dropped.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("precache").join("cache.db"))
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(CacheError::storage("run cache migrations"))
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|_| CacheError::LockPoisoned.into())
  }
}

const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS cache_storage (
    id INTEGER PRIMARY KEY,
    cache_name TEXT NOT NULL UNIQUE
);

-- One row per request identity; the latest put wins
CREATE TABLE IF NOT EXISTS request_response (
    cache_id INTEGER NOT NULL,
    key_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    response_url TEXT,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_id, key_hash),
    FOREIGN KEY (cache_id) REFERENCES cache_storage(id) ON DELETE CASCADE
);
"#;

const ENTRY_COLUMNS: &str =
  "method, url, response_url, status, status_text, headers, body, cached_at";

/// Raw column values of one `request_response` row.
struct EntryRow {
  method: String,
  url: String,
  response_url: Option<String>,
  status: u16,
  status_text: String,
  headers: String,
  body: Vec<u8>,
  cached_at: String,
}

impl EntryRow {
  fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      method: row.get(0)?,
      url: row.get(1)?,
      response_url: row.get(2)?,
      status: row.get(3)?,
      status_text: row.get(4)?,
      headers: row.get(5)?,
      body: row.get(6)?,
      cached_at: row.get(7)?,
    })
  }

  fn into_entry(self) -> Result<CachedEntry> {
    let method = self
      .method
      .parse()
      .map_err(|_| CacheError::CorruptEntry(format!("method '{}'", self.method)))?;
    let url = parse_stored_url(&self.url)?;
    let response_url = self.response_url.as_deref().map(parse_stored_url).transpose()?;
    let status = reqwest::StatusCode::from_u16(self.status)
      .map_err(|_| CacheError::CorruptEntry(format!("status {}", self.status)))?;
    let pairs: Vec<(String, Vec<u8>)> = serde_json::from_str(&self.headers)
      .map_err(|e| CacheError::CorruptEntry(format!("headers: {}", e)))?;

    Ok(CachedEntry {
      key: RequestKey::new(method, &url),
      response: Response {
        url: response_url,
        status,
        status_text: self.status_text,
        headers: headers_from_pairs(pairs)?,
        body: self.body.into(),
      },
      cached_at: parse_datetime(&self.cached_at)?,
    })
  }
}

impl CacheStorage for SqliteStorage {
  fn open_bucket(&self, name: &str) -> Result<BucketId> {
    if name.is_empty() {
      return Err(CacheError::EmptyName.into());
    }
    let conn = self.lock()?;

    conn
      .execute(
        "INSERT OR IGNORE INTO cache_storage (cache_name) VALUES (?)",
        params![name],
      )
      .map_err(CacheError::storage("create cache bucket"))?;

    conn
      .query_row(
        "SELECT id FROM cache_storage WHERE cache_name = ?",
        params![name],
        |row| row.get(0),
      )
      .map_err(CacheError::storage("open cache bucket"))
  }

  fn has_bucket(&self, name: &str) -> Result<bool> {
    let conn = self.lock()?;
    let count: i64 = conn
      .query_row(
        "SELECT count(*) FROM cache_storage WHERE cache_name = ?",
        params![name],
        |row| row.get(0),
      )
      .map_err(CacheError::storage("look up cache bucket"))?;
    Ok(count > 0)
  }

  fn delete_bucket(&self, name: &str) -> Result<bool> {
    let conn = self.lock()?;
    let deleted = conn
      .execute(
        "DELETE FROM cache_storage WHERE cache_name = ?",
        params![name],
      )
      .map_err(CacheError::storage("delete cache bucket"))?;
    Ok(deleted > 0)
  }

  fn bucket_names(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT cache_name FROM cache_storage ORDER BY id")
      .map_err(CacheError::storage("prepare bucket listing"))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(CacheError::storage("list cache buckets"))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(CacheError::storage("read cache bucket name"))?;

    Ok(names)
  }

  fn put_all(&self, bucket: BucketId, entries: &[CacheEntry]) -> Result<()> {
    let mut conn = self.lock()?;

    // Rolled back on drop unless committed
    let tx = conn
      .transaction()
      .map_err(CacheError::storage("begin transaction"))?;

    for entry in entries {
      let headers = serde_json::to_string(&header_pairs(&entry.response.headers))
        .map_err(|e| eyre!("Failed to serialize response headers: {}", e))?;

      tx.execute(
        "INSERT OR REPLACE INTO request_response
           (cache_id, key_hash, method, url, response_url, status, status_text, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
        params![
          bucket,
          entry.key.hash(),
          entry.key.method.as_str(),
          entry.key.url.as_str(),
          entry.response.url.as_ref().map(Url::as_str),
          entry.response.status.as_u16(),
          entry.response.status_text,
          headers,
          entry.response.body.as_ref(),
        ],
      )
      .map_err(CacheError::storage("store cache entry"))?;
    }

    tx.commit()
      .map_err(CacheError::storage("commit transaction"))
  }

  fn match_entry(&self, bucket: BucketId, key: &RequestKey) -> Result<Option<CachedEntry>> {
    let conn = self.lock()?;

    let row = conn
      .query_row(
        &format!(
          "SELECT {} FROM request_response WHERE cache_id = ? AND key_hash = ?",
          ENTRY_COLUMNS
        ),
        params![bucket, key.hash()],
        EntryRow::from_row,
      )
      .optional()
      .map_err(CacheError::storage("match cache entry"))?;

    row.map(EntryRow::into_entry).transpose()
  }

  fn entries(&self, bucket: BucketId) -> Result<Vec<CachedEntry>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(&format!(
        "SELECT {} FROM request_response WHERE cache_id = ? ORDER BY rowid",
        ENTRY_COLUMNS
      ))
      .map_err(CacheError::storage("prepare entry listing"))?;

    let rows = stmt
      .query_map(params![bucket], EntryRow::from_row)
      .map_err(CacheError::storage("list cache entries"))?
      .collect::<rusqlite::Result<Vec<EntryRow>>>()
      .map_err(CacheError::storage("read cache entry"))?;

    rows.into_iter().map(EntryRow::into_entry).collect()
  }

  fn delete_entry(&self, bucket: BucketId, key: &RequestKey) -> Result<bool> {
    let conn = self.lock()?;
    let deleted = conn
      .execute(
        "DELETE FROM request_response WHERE cache_id = ? AND key_hash = ?",
        params![bucket, key.hash()],
      )
      .map_err(CacheError::storage("delete cache entry"))?;
    Ok(deleted > 0)
  }
}

fn parse_stored_url(s: &str) -> Result<Url> {
  Url::parse(s).map_err(|e| CacheError::CorruptEntry(format!("url '{}': {}", s, e)).into())
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
