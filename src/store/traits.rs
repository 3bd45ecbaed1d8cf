//! Storage traits shared by the durable store and its redundant fallback.

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::error::Result;

/// Prefix applied to every key written to a fallback store.
pub const FALLBACK_PREFIX: &str = "posa_";

/// One `{key, value}` record of the durable table.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
  pub key: String,
  pub value: Value,
}

impl StoredRecord {
  /// Approximate encoded size of the record in bytes.
  pub fn size_bytes(&self) -> usize {
    self.key.len() + self.value.to_string().len()
  }
}

/// Asynchronous single-table key-value database.
#[async_trait]
pub trait DurableStore: Send + Sync {
  /// Open the database. Opening an already open store is a no-op.
  async fn open(&self) -> Result<()>;

  /// Release the underlying handle.
  async fn close(&self);

  fn is_open(&self) -> bool;

  async fn get(&self, key: &str) -> Result<Option<Value>>;

  async fn put(&self, key: &str, value: &Value) -> Result<()>;

  async fn delete(&self, key: &str) -> Result<()>;

  /// Remove every record but keep the database.
  async fn clear(&self) -> Result<()>;

  /// All records currently stored.
  async fn entries(&self) -> Result<Vec<StoredRecord>>;

  /// Delete the whole database. The store is closed afterwards and must be
  /// reopened before further use.
  async fn destroy(&self) -> Result<()>;

  /// Make sure the store is usable, reopening it once if it is closed.
  async fn check_health(&self) -> Result<()> {
    if self.is_open() {
      return Ok(());
    }
    warn!("durable store closed, attempting reopen");
    self.open().await
  }
}

/// Synchronous, namespaced key-value store mirroring the durable keys.
///
/// Values are stored as raw JSON text so a fallback read never depends on the
/// durable store having finished opening.
pub trait FallbackStore: Send + Sync {
  fn get(&self, key: &str) -> Option<String>;

  fn set(&self, key: &str, raw: &str) -> Result<()>;

  fn remove(&self, key: &str);

  /// Remove every key in this store's namespace.
  fn clear_namespace(&self) -> Result<()>;

  /// Namespaced `(key, raw)` pairs, keys including the prefix.
  fn entries(&self) -> Vec<(String, String)>;
}

pub(crate) fn namespaced(key: &str) -> String {
  format!("{FALLBACK_PREFIX}{key}")
}
