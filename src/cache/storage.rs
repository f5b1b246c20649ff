//! Cache store trait and SQLite implementation.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::traits::{Headers, RequestKey, Response, StoredResponse};
use crate::error::StoreError;

/// Trait for cache store backends.
///
/// A store holds any number of named generations, each an unordered
/// `RequestKey -> StoredResponse` mapping.
pub trait CacheStore: Send + Sync {
  /// Create the generation if it does not exist yet.
  fn open_generation(&self, tag: &str) -> Result<(), StoreError>;

  /// Write all entries into a generation as one unit, replacing existing keys.
  fn put_entries(&self, tag: &str, entries: &[(RequestKey, Response)]) -> Result<(), StoreError>;

  /// Look up a key in a single generation.
  fn lookup(&self, tag: &str, key: &RequestKey) -> Result<Option<StoredResponse>, StoreError>;

  /// All generation tags known to the store.
  fn list_generations(&self) -> Result<Vec<String>, StoreError>;

  /// Delete a generation and its entries. Returns false if it did not exist.
  fn delete_generation(&self, tag: &str) -> Result<bool, StoreError>;

  /// Number of entries held by a generation.
  fn entry_count(&self, tag: &str) -> Result<usize, StoreError>;
}

/// SQLite-based cache store implementation.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open (or create) the store at the given path.
  pub fn open(path: &Path) -> Result<Self, StoreError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
      std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
        path: parent.to_path_buf(),
        source,
      })?;
    }

    let conn = Connection::open(path).map_err(StoreError::sqlite("open cache database"))?;
    Self::with_connection(conn)
  }

  /// Open a throwaway store living only as long as this value.
  #[allow(dead_code)]
  pub fn open_in_memory() -> Result<Self, StoreError> {
    let conn = Connection::open_in_memory().map_err(StoreError::sqlite("open in-memory database"))?;
    Self::with_connection(conn)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf, StoreError> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or(StoreError::NoDataDir)?;

    Ok(data_dir.join("ulisse-offline").join("cache.db"))
  }

  fn with_connection(conn: Connection) -> Result<Self, StoreError> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(StoreError::sqlite("run cache migrations"))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
    self.conn.lock().map_err(|_| StoreError::LockPoisoned)
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS generations (
    tag TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS entries (
    generation TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    locator TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, key_hash)
);
"#;

impl CacheStore for SqliteStore {
  fn open_generation(&self, tag: &str) -> Result<(), StoreError> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO generations (tag) VALUES (?)",
        params![tag],
      )
      .map_err(StoreError::sqlite("create generation"))?;
    Ok(())
  }

  fn put_entries(&self, tag: &str, entries: &[(RequestKey, Response)]) -> Result<(), StoreError> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(StoreError::sqlite("begin transaction"))?;

    tx.execute(
      "INSERT OR IGNORE INTO generations (tag) VALUES (?)",
      params![tag],
    )
    .map_err(StoreError::sqlite("create generation"))?;

    for (key, response) in entries {
      let headers = serde_json::to_string(&response.headers)?;
      tx.execute(
        "INSERT OR REPLACE INTO entries (generation, key_hash, method, locator, status, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
        params![
          tag,
          key.cache_hash(),
          key.method().as_str(),
          key.locator(),
          response.status,
          headers,
          response.body,
        ],
      )
      .map_err(StoreError::sqlite("store entry"))?;
    }

    // Dropping an uncommitted transaction rolls it back
    tx.commit().map_err(StoreError::sqlite("commit transaction"))?;
    Ok(())
  }

  fn lookup(&self, tag: &str, key: &RequestKey) -> Result<Option<StoredResponse>, StoreError> {
    let conn = self.lock()?;

    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, cached_at FROM entries
         WHERE generation = ? AND key_hash = ?",
        params![tag, key.cache_hash()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(StoreError::sqlite("read entry"))?;

    match row {
      Some((status, headers, body, cached_at)) => {
        let headers: Headers = serde_json::from_str(&headers)?;
        Ok(Some(StoredResponse {
          response: Response {
            status,
            headers,
            body,
          },
          cached_at: parse_datetime(&cached_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn list_generations(&self) -> Result<Vec<String>, StoreError> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT tag FROM generations ORDER BY created_at, tag")
      .map_err(StoreError::sqlite("prepare generation listing"))?;

    let tags = stmt
      .query_map([], |row| row.get(0))
      .map_err(StoreError::sqlite("list generations"))?
      .collect::<Result<Vec<String>, _>>()
      .map_err(StoreError::sqlite("list generations"))?;

    Ok(tags)
  }

  fn delete_generation(&self, tag: &str) -> Result<bool, StoreError> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(StoreError::sqlite("begin transaction"))?;

    tx.execute("DELETE FROM entries WHERE generation = ?", params![tag])
      .map_err(StoreError::sqlite("delete entries"))?;
    let removed = tx
      .execute("DELETE FROM generations WHERE tag = ?", params![tag])
      .map_err(StoreError::sqlite("delete generation"))?;

    tx.commit().map_err(StoreError::sqlite("commit transaction"))?;
    Ok(removed > 0)
  }

  fn entry_count(&self, tag: &str) -> Result<usize, StoreError> {
    let conn = self.lock()?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM entries WHERE generation = ?",
        params![tag],
        |row| row.get(0),
      )
      .map_err(StoreError::sqlite("count entries"))?;
    Ok(usize::try_from(count).unwrap_or_default())
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|_| StoreError::Timestamp(s.to_string()))
}
