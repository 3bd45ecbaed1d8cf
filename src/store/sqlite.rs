//! SQLite-backed durable store.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

use super::traits::{DurableStore, StoredRecord};
use crate::error::{OfflineError, Result};

/// Schema for the key-value table.
const KEYVAL_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS keyval (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Durable store keeping every cache slot as one JSON row.
pub struct SqliteStore {
  path: PathBuf,
  conn: Mutex<Option<Connection>>,
}

impl SqliteStore {
  /// Create a store for the database at `path`. Nothing is opened yet.
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      conn: Mutex::new(None),
    }
  }

  /// Default database location under the user's data directory.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| OfflineError::Storage("could not determine data directory".into()))?;

    Ok(data_dir.join("posync").join("offline.db"))
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
    let guard = self
      .conn
      .lock()
      .map_err(|e| OfflineError::Storage(format!("lock poisoned: {}", e)))?;
    let conn = guard
      .as_ref()
      .ok_or_else(|| OfflineError::Storage("database is not open".into()))?;
    Ok(f(conn)?)
  }
}

#[async_trait]
impl DurableStore for SqliteStore {
  async fn open(&self) -> Result<()> {
    let mut guard = self
      .conn
      .lock()
      .map_err(|e| OfflineError::Storage(format!("lock poisoned: {}", e)))?;
    if guard.is_some() {
      return Ok(());
    }

    // Ensure parent directory exists
    if let Some(parent) = self.path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        OfflineError::Storage(format!("failed to create database directory: {}", e))
      })?;
    }

    let conn = Connection::open(&self.path).map_err(|e| {
      OfflineError::Storage(format!(
        "failed to open database at {}: {}",
        self.path.display(),
        e
      ))
    })?;
    conn.execute_batch(KEYVAL_SCHEMA)?;

    debug!(path = %self.path.display(), "durable store opened");
    *guard = Some(conn);
    Ok(())
  }

  async fn close(&self) {
    if let Ok(mut guard) = self.conn.lock() {
      // Dropping the connection closes it
      guard.take();
    }
  }

  fn is_open(&self) -> bool {
    self.conn.lock().map(|g| g.is_some()).unwrap_or(false)
  }

  async fn get(&self, key: &str) -> Result<Option<Value>> {
    let raw: Option<String> = self.with_conn(|conn| {
      conn
        .query_row("SELECT value FROM keyval WHERE key = ?", params![key], |row| row.get(0))
        .optional()
    })?;

    match raw {
      Some(text) => serde_json::from_str(&text)
        .map(Some)
        .map_err(|e| OfflineError::serialization(key, e)),
      None => Ok(None),
    }
  }

  async fn put(&self, key: &str, value: &Value) -> Result<()> {
    let text = serde_json::to_string(value).map_err(|e| OfflineError::serialization(key, e))?;
    self.with_conn(|conn| {
      conn.execute(
        "INSERT OR REPLACE INTO keyval (key, value) VALUES (?, ?)",
        params![key, text],
      )
    })?;
    Ok(())
  }

  async fn delete(&self, key: &str) -> Result<()> {
    self.with_conn(|conn| conn.execute("DELETE FROM keyval WHERE key = ?", params![key]))?;
    Ok(())
  }

  async fn clear(&self) -> Result<()> {
    self.with_conn(|conn| conn.execute("DELETE FROM keyval", []))?;
    Ok(())
  }

  async fn entries(&self) -> Result<Vec<StoredRecord>> {
    let rows: Vec<(String, String)> = self.with_conn(|conn| {
      let mut stmt = conn.prepare("SELECT key, value FROM keyval ORDER BY key")?;
      let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
      Ok(rows)
    })?;

    Ok(
      rows
        .into_iter()
        .filter_map(|(key, text)| {
          serde_json::from_str(&text)
            .ok()
            .map(|value| StoredRecord { key, value })
        })
        .collect(),
    )
  }

  async fn destroy(&self) -> Result<()> {
    self.close().await;

    for suffix in ["", "-wal", "-shm", "-journal"] {
      let mut file = self.path.clone().into_os_string();
      file.push(suffix);
      let file = PathBuf::from(file);
      if file.exists() {
        std::fs::remove_file(&file).map_err(|e| {
          OfflineError::Storage(format!("failed to delete {}: {}", file.display(), e))
        })?;
      }
    }

    info!(path = %self.path.display(), "durable store deleted");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn temp_store() -> (tempfile::TempDir, SqliteStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = SqliteStore::new(dir.path().join("nested").join("offline.db"));
    (dir, store)
  }

  #[tokio::test]
  async fn test_put_get_delete() {
    let (_dir, store) = temp_store();
    store.open().await.unwrap();

    store.put("offers_cache", &json!([{"name": "A"}])).await.unwrap();
    assert_eq!(
      store.get("offers_cache").await.unwrap(),
      Some(json!([{"name": "A"}]))
    );

    store.delete("offers_cache").await.unwrap();
    assert_eq!(store.get("offers_cache").await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_open_is_idempotent() {
    let (_dir, store) = temp_store();
    store.open().await.unwrap();
    store.put("tax_inclusive", &json!(true)).await.unwrap();
    store.open().await.unwrap();
    assert_eq!(store.get("tax_inclusive").await.unwrap(), Some(json!(true)));
  }

  #[tokio::test]
  async fn test_closed_store_fails_then_health_check_reopens() {
    let (_dir, store) = temp_store();
    assert!(store.get("anything").await.is_err());

    store.check_health().await.unwrap();
    assert!(store.is_open());
    assert_eq!(store.get("anything").await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_destroy_removes_database() {
    let (_dir, store) = temp_store();
    store.open().await.unwrap();
    store.put("cache_version", &json!(1)).await.unwrap();

    store.destroy().await.unwrap();
    assert!(!store.is_open());
    assert!(!store.path().exists());

    store.open().await.unwrap();
    assert!(store.entries().await.unwrap().is_empty());
  }
}
