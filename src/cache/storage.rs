//! Persistent snapshot of authoritative query results, and its SQLite implementation.
//!
//! Only data confirmed by the server is written here. Provisional records
//! never reach storage.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A persisted query result.
#[derive(Debug, Clone)]
pub struct StoredQuery {
  /// Serialized JSON payload
  pub data: Vec<u8>,
  /// When the payload was fetched from the server
  pub fetched_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
pub trait CacheStorage: Send + Sync {
  /// Store the serialized result of a query.
  fn store_query_result(
    &self,
    key_hash: &str,
    description: &str,
    data: &[u8],
    fetched_at: DateTime<Utc>,
  ) -> Result<()>;

  /// Get the stored result for a query.
  fn get_query_result(&self, key_hash: &str) -> Result<Option<StoredQuery>>;

  /// Forget a stored query.
  fn remove_query_result(&self, key_hash: &str) -> Result<()>;
}

/// Storage implementation that doesn't persist anything.
/// Used when persistence is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn store_query_result(
    &self,
    _key_hash: &str,
    _description: &str,
    _data: &[u8],
    _fetched_at: DateTime<Utc>,
  ) -> Result<()> {
    Ok(()) // Discard
  }

  fn get_query_result(&self, _key_hash: &str) -> Result<Option<StoredQuery>> {
    Ok(None) // Always miss
  }

  fn remove_query_result(&self, _key_hash: &str) -> Result<()> {
    Ok(())
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the storage at the given path, or at the default location.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a private in-memory database.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory cache: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("ispadmin").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS query_cache (
    query_hash TEXT PRIMARY KEY,
    query_description TEXT NOT NULL,
    data BLOB NOT NULL,
    fetched_at TEXT NOT NULL
);
"#;

impl CacheStorage for SqliteStorage {
  fn store_query_result(
    &self,
    key_hash: &str,
    description: &str,
    data: &[u8],
    fetched_at: DateTime<Utc>,
  ) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO query_cache (query_hash, query_description, data, fetched_at)
         VALUES (?, ?, ?, ?)",
        params![key_hash, description, data, fetched_at.to_rfc3339()],
      )
      .map_err(|e| eyre!("Failed to store query result: {}", e))?;

    Ok(())
  }

  fn get_query_result(&self, key_hash: &str) -> Result<Option<StoredQuery>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(Vec<u8>, String)> = conn
      .query_row(
        "SELECT data, fetched_at FROM query_cache WHERE query_hash = ?",
        params![key_hash],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read query result: {}", e))?;

    match row {
      Some((data, fetched_at)) => Ok(Some(StoredQuery {
        data,
        fetched_at: parse_datetime(&fetched_at)?,
      })),
      None => Ok(None),
    }
  }

  fn remove_query_result(&self, key_hash: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM query_cache WHERE query_hash = ?",
        params![key_hash],
      )
      .map_err(|e| eyre!("Failed to delete query result: {}", e))?;

    Ok(())
  }
}

/// Parse an RFC 3339 timestamp written by `store_query_result`.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_store_and_load() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let now = Utc::now();
    storage
      .store_query_result("abc", "tickets/list", br#"[{"id":"t1"}]"#, now)
      .unwrap();

    let stored = storage.get_query_result("abc").unwrap().unwrap();
    assert_eq!(stored.data, br#"[{"id":"t1"}]"#.to_vec());
    assert_eq!(stored.fetched_at.timestamp(), now.timestamp());
  }

  #[test]
  fn test_store_replaces_previous() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage
      .store_query_result("abc", "d", b"[1]", Utc::now())
      .unwrap();
    storage
      .store_query_result("abc", "d", b"[2]", Utc::now())
      .unwrap();
    assert_eq!(storage.get_query_result("abc").unwrap().unwrap().data, b"[2]");
  }

  #[test]
  fn test_missing_and_removed() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    assert!(storage.get_query_result("nope").unwrap().is_none());

    storage
      .store_query_result("abc", "d", b"{}", Utc::now())
      .unwrap();
    storage.remove_query_result("abc").unwrap();
    assert!(storage.get_query_result("abc").unwrap().is_none());
  }

  #[test]
  fn test_open_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");
    {
      let storage = SqliteStorage::open(Some(&path)).unwrap();
      storage
        .store_query_result("k", "d", b"[]", Utc::now())
        .unwrap();
    }
    let reopened = SqliteStorage::open(Some(&path)).unwrap();
    assert!(reopened.get_query_result("k").unwrap().is_some());
  }

  #[test]
  fn test_noop_storage_always_misses() {
    let storage = NoopStorage;
    storage
      .store_query_result("k", "d", b"[]", Utc::now())
      .unwrap();
    assert!(storage.get_query_result("k").unwrap().is_none());
  }
}
