//! In-memory stores, used for ephemeral sessions and tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::traits::{namespaced, DurableStore, FallbackStore, StoredRecord, FALLBACK_PREFIX};
use crate::error::{OfflineError, Result};

/// Durable store keeping records in a map.
///
/// Writes can be made to fail on demand, and every successful `put` is
/// counted, so callers can observe how many writes reached the store.
pub struct MemoryStore {
  data: Mutex<BTreeMap<String, Value>>,
  open: AtomicBool,
  failing: AtomicBool,
  writes: AtomicUsize,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self {
      data: Mutex::new(BTreeMap::new()),
      open: AtomicBool::new(false),
      failing: AtomicBool::new(false),
      writes: AtomicUsize::new(0),
    }
  }

  /// Make every subsequent operation fail with a storage fault.
  pub fn set_failing(&self, failing: bool) {
    self.failing.store(failing, Ordering::SeqCst);
  }

  /// Number of successful `put` calls so far.
  pub fn write_count(&self) -> usize {
    self.writes.load(Ordering::SeqCst)
  }

  fn data(&self) -> MutexGuard<'_, BTreeMap<String, Value>> {
    self.data.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn ensure_usable(&self) -> Result<()> {
    if self.failing.load(Ordering::SeqCst) {
      return Err(OfflineError::Storage("store unavailable".into()));
    }
    if !self.open.load(Ordering::SeqCst) {
      return Err(OfflineError::Storage("database is not open".into()));
    }
    Ok(())
  }
}

impl Default for MemoryStore {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl DurableStore for MemoryStore {
  async fn open(&self) -> Result<()> {
    if self.failing.load(Ordering::SeqCst) {
      return Err(OfflineError::Storage("store unavailable".into()));
    }
    self.open.store(true, Ordering::SeqCst);
    Ok(())
  }

  async fn close(&self) {
    self.open.store(false, Ordering::SeqCst);
  }

  fn is_open(&self) -> bool {
    self.open.load(Ordering::SeqCst)
  }

  async fn get(&self, key: &str) -> Result<Option<Value>> {
    self.ensure_usable()?;
    Ok(self.data().get(key).cloned())
  }

  async fn put(&self, key: &str, value: &Value) -> Result<()> {
    self.ensure_usable()?;
    self.data().insert(key.to_string(), value.clone());
    self.writes.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }

  async fn delete(&self, key: &str) -> Result<()> {
    self.ensure_usable()?;
    self.data().remove(key);
    Ok(())
  }

  async fn clear(&self) -> Result<()> {
    self.ensure_usable()?;
    self.data().clear();
    Ok(())
  }

  async fn entries(&self) -> Result<Vec<StoredRecord>> {
    self.ensure_usable()?;
    Ok(
      self
        .data()
        .iter()
        .map(|(key, value)| StoredRecord {
          key: key.clone(),
          value: value.clone(),
        })
        .collect(),
    )
  }

  async fn destroy(&self) -> Result<()> {
    if self.failing.load(Ordering::SeqCst) {
      return Err(OfflineError::Storage("store unavailable".into()));
    }
    self.data().clear();
    self.open.store(false, Ordering::SeqCst);
    Ok(())
  }
}

/// Fallback store keeping raw JSON text in a map.
#[derive(Default)]
pub struct MemoryFallback {
  data: Mutex<BTreeMap<String, String>>,
}

impl MemoryFallback {
  pub fn new() -> Self {
    Self::default()
  }

  fn data(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
    self.data.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl FallbackStore for MemoryFallback {
  fn get(&self, key: &str) -> Option<String> {
    self.data().get(&namespaced(key)).cloned()
  }

  fn set(&self, key: &str, raw: &str) -> Result<()> {
    self.data().insert(namespaced(key), raw.to_string());
    Ok(())
  }

  fn remove(&self, key: &str) {
    self.data().remove(&namespaced(key));
  }

  fn clear_namespace(&self) -> Result<()> {
    self.data().retain(|k, _| !k.starts_with(FALLBACK_PREFIX));
    Ok(())
  }

  fn entries(&self) -> Vec<(String, String)> {
    self
      .data()
      .iter()
      .map(|(k, v)| (k.clone(), v.clone()))
      .collect()
  }
}
