//! Write-through persistence to the durable and fallback stores.

use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{error, warn};

use super::worker::{PersistWorker, WorkerEvent, WorkerMessage};
use crate::error::{OfflineError, Result};
use crate::store::{DurableStore, FallbackStore};

/// Deep copy `value` into a plain JSON tree, or fail.
///
/// Values serde cannot represent (maps with non-string keys, failing
/// `Serialize` impls) are rejected instead of being silently dropped.
pub fn structural_clone<T: Serialize + ?Sized>(key: &str, value: &T) -> Result<Value> {
  serde_json::to_value(value).map_err(|e| {
    error!(key = %key, error = %e, "value is not serializable");
    OfflineError::serialization(key, e)
  })
}

/// Persists values to both stores, optionally through a background worker.
pub struct Persister {
  durable: Arc<dyn DurableStore>,
  fallback: Arc<dyn FallbackStore>,
  worker: Mutex<Option<PersistWorker>>,
  use_worker: bool,
}

impl Persister {
  /// Create a persister that writes inline.
  pub fn new(durable: Arc<dyn DurableStore>, fallback: Arc<dyn FallbackStore>) -> Self {
    Self {
      durable,
      fallback,
      worker: Mutex::new(None),
      use_worker: false,
    }
  }

  /// Offload durable writes to a background worker task.
  ///
  /// Must be called from within a tokio runtime.
  pub fn with_worker(mut self) -> Self {
    self.use_worker = true;
    self.init_worker();
    self
  }

  pub fn durable(&self) -> &Arc<dyn DurableStore> {
    &self.durable
  }

  pub fn fallback(&self) -> &Arc<dyn FallbackStore> {
    &self.fallback
  }

  fn worker(&self) -> MutexGuard<'_, Option<PersistWorker>> {
    self.worker.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// (Re)start the background worker if this persister uses one.
  pub fn init_worker(&self) {
    if !self.use_worker {
      return;
    }
    let mut worker = self.worker();
    if worker.as_ref().is_some_and(PersistWorker::is_alive) {
      return;
    }
    *worker = Some(PersistWorker::spawn(self.durable.clone()));
  }

  /// Stop the background worker. Later writes go inline until re-armed.
  pub fn terminate_worker(&self) {
    if let Some(worker) = self.worker().take() {
      worker.terminate();
    }
  }

  /// Let the worker finish its queued writes, then stop it. Later writes go
  /// inline until re-armed.
  pub async fn drain_worker(&self) {
    let worker = self.worker().take();
    if let Some(worker) = worker {
      worker.shutdown().await;
    }
  }

  pub fn has_worker(&self) -> bool {
    self.worker().is_some()
  }

  /// Subscribe to worker completion events, if a worker is running.
  pub fn subscribe(&self) -> Option<broadcast::Receiver<WorkerEvent>> {
    self.worker().as_ref().map(PersistWorker::subscribe)
  }

  /// Serialize `value` and persist it under `key`.
  pub async fn persist_serialize<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
    let clean = structural_clone(key, value)?;
    self.persist(key, &clean).await;
    Ok(())
  }

  /// Persist an already structural value under `key`.
  ///
  /// The fallback copy is written synchronously. The durable write goes to the
  /// worker when one is running, otherwise it happens inline. Storage faults
  /// are logged and never returned: the fallback copy still holds the value.
  pub async fn persist(&self, key: &str, value: &Value) {
    self.write_fallback(key, value);

    let message = WorkerMessage::Persist {
      key: key.to_string(),
      value: value.clone(),
    };

    let rejected = {
      let worker = self.worker();
      match worker.as_ref() {
        Some(w) => w.send(message).err(),
        None => Some(message),
      }
    };

    if let Some(WorkerMessage::Persist { key, value }) = rejected {
      if self.has_worker() {
        warn!(key = %key, "persist worker unavailable, writing inline");
      }
      self.write_durable(&key, &value).await;
    }
  }

  async fn write_durable(&self, key: &str, value: &Value) {
    if let Err(e) = self.durable.put(key, value).await {
      error!(key = %key, error = %e, "failed to persist to durable store");
    }
  }

  fn write_fallback(&self, key: &str, value: &Value) {
    match serde_json::to_string(value) {
      Ok(raw) => {
        if let Err(e) = self.fallback.set(key, &raw) {
          error!(key = %key, error = %e, "failed to persist to fallback store");
        }
      }
      Err(e) => error!(key = %key, error = %e, "failed to encode fallback value"),
    }
  }

  /// Read `key` from the fallback store.
  pub fn read_fallback(&self, key: &str) -> Result<Option<Value>> {
    match self.fallback.get(key) {
      Some(raw) => serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| OfflineError::serialization(key, e)),
      None => Ok(None),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::{MemoryFallback, MemoryStore};
  use serde_json::json;
  use std::collections::HashMap;

  async fn stores() -> (Arc<MemoryStore>, Arc<MemoryFallback>) {
    let durable = Arc::new(MemoryStore::new());
    durable.open().await.unwrap();
    (durable, Arc::new(MemoryFallback::new()))
  }

  #[tokio::test]
  async fn test_inline_persist_writes_both_stores() {
    let (durable, fallback) = stores().await;
    let persister = Persister::new(durable.clone(), fallback.clone());

    persister.persist("tax_inclusive", &json!(true)).await;

    assert_eq!(durable.get("tax_inclusive").await.unwrap(), Some(json!(true)));
    assert_eq!(fallback.get("tax_inclusive").as_deref(), Some("true"));
  }

  #[tokio::test]
  async fn test_storage_fault_degrades_to_fallback() {
    let (durable, fallback) = stores().await;
    durable.set_failing(true);
    let persister = Persister::new(durable.clone(), fallback.clone());

    persister.persist("offers_cache", &json!([1, 2])).await;

    assert_eq!(
      persister.read_fallback("offers_cache").unwrap(),
      Some(json!([1, 2]))
    );
  }

  #[tokio::test]
  async fn test_unserializable_value_fails_loudly() {
    let (durable, fallback) = stores().await;
    let persister = Persister::new(durable.clone(), fallback);

    let mut bad: HashMap<(u8, u8), u8> = HashMap::new();
    bad.insert((1, 2), 3);

    let err = persister.persist_serialize("bad", &bad).await.unwrap_err();
    assert!(matches!(err, OfflineError::Serialization { .. }));
    assert_eq!(durable.write_count(), 0);
  }

  #[tokio::test]
  async fn test_worker_persist_and_terminate_falls_back_inline() {
    let (durable, fallback) = stores().await;
    let persister = Persister::new(durable.clone(), fallback).with_worker();
    let mut events = persister.subscribe().expect("worker running");

    persister.persist("uom_cache", &json!({})).await;
    assert_eq!(
      events.recv().await.unwrap(),
      WorkerEvent::Persisted {
        key: "uom_cache".into()
      }
    );

    persister.terminate_worker();
    assert!(!persister.has_worker());

    persister.persist("coupons_cache", &json!({"C1": {}})).await;
    assert_eq!(
      durable.get("coupons_cache").await.unwrap(),
      Some(json!({"C1": {}}))
    );
  }
}
