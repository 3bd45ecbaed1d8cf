//! Versioned in-memory mirror of every cache slot.

use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use super::slot::{Slot, CACHE_VERSION};
use crate::error::Result;
use crate::persist::{PersistBatcher, Persister};

/// Single source of truth for the named cache slots.
///
/// Every write goes through [`CacheRegistry::set_state`] or
/// [`CacheRegistry::update_state`], which pair the in-memory change with a
/// persistence call. Reads hand out owned copies.
pub struct CacheRegistry {
  state: RwLock<BTreeMap<Slot, Value>>,
  /// Serializes writers and batch flushes so per-key persistence order
  /// follows memory order
  write_lock: Arc<Mutex<()>>,
  persister: Arc<Persister>,
  batcher: PersistBatcher,
  ready: watch::Sender<bool>,
}

fn defaults() -> BTreeMap<Slot, Value> {
  Slot::ALL
    .into_iter()
    .map(|slot| (slot, slot.default_value()))
    .collect()
}

impl CacheRegistry {
  pub fn new(persister: Arc<Persister>) -> Self {
    let (ready, _) = watch::channel(false);
    let write_lock = Arc::new(Mutex::new(()));
    Self {
      state: RwLock::new(defaults()),
      batcher: PersistBatcher::new(Arc::clone(&persister), Arc::clone(&write_lock)),
      write_lock,
      persister,
      ready,
    }
  }

  fn read(&self) -> RwLockReadGuard<'_, BTreeMap<Slot, Value>> {
    self.state.read().unwrap_or_else(PoisonError::into_inner)
  }

  fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<Slot, Value>> {
    self.state.write().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn persister(&self) -> &Arc<Persister> {
    &self.persister
  }

  /// Whether startup hydration has completed.
  pub fn is_ready(&self) -> bool {
    *self.ready.borrow()
  }

  /// Resolve once hydration has completed.
  pub async fn wait_ready(&self) {
    let mut rx = self.ready.subscribe();
    // The sender lives as long as `self`
    let _ = rx.wait_for(|ready| *ready).await;
  }

  /// Owned copy of every slot.
  pub fn snapshot(&self) -> BTreeMap<Slot, Value> {
    self.read().clone()
  }

  /// Owned copy of one slot.
  pub fn get_state(&self, slot: Slot) -> Value {
    self
      .read()
      .get(&slot)
      .cloned()
      .unwrap_or_else(|| slot.default_value())
  }

  /// Replace a slot and persist it.
  pub async fn set_state(&self, slot: Slot, value: Value) {
    self.update_state(slot, move |current| *current = value).await
  }

  /// Mutate a slot in place and persist the result.
  pub async fn update_state<R>(&self, slot: Slot, f: impl FnOnce(&mut Value) -> R) -> R {
    let _guard = self.write_lock.lock().await;

    let (result, snapshot) = {
      let mut state = self.write();
      // Under the state lock, so a batched write can't slip in between
      self.batcher.discard(slot.key());
      let value = state.entry(slot).or_insert_with(|| slot.default_value());
      let result = f(value);
      (result, value.clone())
    };

    self.persister.persist(slot.key(), &snapshot).await;
    result
  }

  /// Mutate a slot in place, coalescing the persistence with other writes to
  /// the same slot inside the batch window.
  ///
  /// Must be called from within a tokio runtime.
  pub fn update_state_batched<R>(&self, slot: Slot, f: impl FnOnce(&mut Value) -> R) -> R {
    let mut state = self.write();
    let value = state.entry(slot).or_insert_with(|| slot.default_value());
    let result = f(value);
    self.batcher.queue(slot.key(), value.clone());
    result
  }

  /// Write out batched persistence immediately.
  pub async fn flush(&self) {
    self.batcher.flush().await;
  }

  /// Load every slot from storage and verify the cache version.
  ///
  /// A slot that fails to load keeps its default; the registry becomes ready
  /// regardless. A version mismatch purges everything before the registry is
  /// marked ready.
  pub async fn hydrate(&self) {
    let _guard = self.write_lock.lock().await;

    if let Err(e) = self.persister.durable().check_health().await {
      warn!(error = %e, "durable store unavailable, hydrating from fallback");
    }

    let mut loaded = defaults();
    let mut stored_version = None;
    for slot in Slot::ALL {
      match self.load_slot(slot).await {
        Ok(Some(value)) => {
          if slot == Slot::CacheVersion {
            stored_version = value.as_i64();
          }
          loaded.insert(slot, value);
        }
        Ok(None) => {}
        Err(e) => error!(slot = %slot, error = %e, "failed to hydrate slot"),
      }
    }
    *self.write() = loaded;

    if stored_version != Some(CACHE_VERSION) {
      info!(
        stored = ?stored_version,
        expected = CACHE_VERSION,
        "cache version mismatch, purging cache"
      );
      self.force_clear_locked().await;
    }

    debug!("cache registry hydrated");
    self.ready.send_replace(true);
  }

  async fn load_slot(&self, slot: Slot) -> Result<Option<Value>> {
    match self.persister.durable().get(slot.key()).await {
      Ok(Some(value)) => return Ok(Some(value)),
      Ok(None) => {}
      Err(e) => warn!(slot = %slot, error = %e, "durable read failed, trying fallback"),
    }
    self.persister.read_fallback(slot.key())
  }

  fn reset_memory(&self) {
    *self.write() = defaults();
  }

  /// Clear every slot and recreate the database, verifying store health first.
  pub async fn clear_all_cache(&self) {
    let _guard = self.write_lock.lock().await;
    let durable = self.persister.durable();

    let recreated = async {
      durable.check_health().await?;
      self.persister.terminate_worker();
      durable.close().await;
      durable.destroy().await?;
      durable.open().await
    }
    .await;
    if let Err(e) = recreated {
      error!(error = %e, "failed to clear durable cache");
    }
    self.persister.init_worker();

    if let Err(e) = self.persister.fallback().clear_namespace() {
      error!(error = %e, "failed to clear fallback cache");
    }
    self.batcher.discard_all();
    self.reset_memory();

    self
      .persister
      .persist(Slot::CacheVersion.key(), &json!(CACHE_VERSION))
      .await;
    info!("cache cleared");
  }

  /// Clear every slot immediately, deleting the database afterwards.
  pub async fn force_clear_all_cache(&self) {
    let _guard = self.write_lock.lock().await;
    self.force_clear_locked().await;
  }

  async fn force_clear_locked(&self) {
    self.persister.terminate_worker();
    self.batcher.discard_all();

    let fallback = self.persister.fallback();
    if let Err(e) = fallback.clear_namespace() {
      error!(error = %e, "failed to clear fallback cache");
    }
    self.reset_memory();
    if let Err(e) = fallback.set(Slot::CacheVersion.key(), &CACHE_VERSION.to_string()) {
      error!(error = %e, "failed to record cache version");
    }

    let durable = self.persister.durable();
    let recreated = async {
      durable.destroy().await?;
      durable.open().await
    }
    .await;
    if let Err(e) = recreated {
      error!(error = %e, "failed to delete durable cache");
    }
    self.persister.init_worker();

    self
      .persister
      .persist(Slot::CacheVersion.key(), &json!(CACHE_VERSION))
      .await;
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use crate::store::{DurableStore, FallbackStore, MemoryFallback, MemoryStore};

  pub(crate) struct Fixture {
    pub durable: Arc<MemoryStore>,
    pub fallback: Arc<MemoryFallback>,
    pub registry: Arc<CacheRegistry>,
  }

  impl Fixture {
    /// Fresh registry over existing stores.
    pub fn reopen(&self) -> Arc<CacheRegistry> {
      let persister = Persister::new(self.durable.clone(), self.fallback.clone());
      Arc::new(CacheRegistry::new(Arc::new(persister)))
    }
  }

  /// A hydrated registry over empty in-memory stores.
  pub(crate) async fn fixture() -> Fixture {
    let durable = Arc::new(MemoryStore::new());
    let fallback = Arc::new(MemoryFallback::new());
    let persister = Persister::new(durable.clone(), fallback.clone());
    let registry = Arc::new(CacheRegistry::new(Arc::new(persister)));
    registry.hydrate().await;
    Fixture {
      durable,
      fallback,
      registry,
    }
  }

  #[tokio::test]
  async fn test_fresh_store_hydrates_to_defaults() {
    let fx = fixture().await;

    assert!(fx.registry.is_ready());
    assert_eq!(fx.registry.snapshot(), defaults());
    assert_eq!(
      fx.durable.get("cache_version").await.unwrap(),
      Some(json!(CACHE_VERSION))
    );
  }

  #[tokio::test]
  async fn test_hydration_is_idempotent() {
    let fx = fixture().await;
    fx.registry
      .set_state(Slot::OffersCache, json!([{"name": "10% off"}]))
      .await;
    fx.registry.set_state(Slot::TaxInclusive, json!(true)).await;

    let first = fx.reopen();
    first.hydrate().await;
    let second = fx.reopen();
    second.hydrate().await;
    first.hydrate().await;

    assert_eq!(first.snapshot(), second.snapshot());
    assert_eq!(first.get_state(Slot::TaxInclusive), json!(true));
  }

  #[tokio::test]
  async fn test_version_mismatch_purges_every_slot() {
    let fx = fixture().await;
    fx.registry
      .set_state(Slot::OfflineInvoices, json!([{"invoice": {"items": [1]}}]))
      .await;
    fx.registry
      .set_state(Slot::CustomerStorage, json!([{"name": "C1"}]))
      .await;
    fx.registry
      .set_state(Slot::CacheVersion, json!(CACHE_VERSION - 1))
      .await;

    let registry = fx.reopen();
    registry.hydrate().await;

    let snapshot = registry.snapshot();
    for slot in Slot::ALL {
      assert_eq!(snapshot[&slot], slot.default_value(), "slot {slot}");
    }
    assert_eq!(registry.get_state(Slot::CacheVersion), json!(CACHE_VERSION));
    assert_eq!(fx.durable.get("offline_invoices").await.unwrap(), None);
    assert_eq!(fx.fallback.get("customer_storage"), None);
  }

  #[tokio::test]
  async fn test_hydration_falls_back_when_durable_store_fails() {
    let fx = fixture().await;
    fx.registry.set_state(Slot::ManualOffline, json!(true)).await;
    fx.durable.set_failing(true);

    let registry = fx.reopen();
    registry.hydrate().await;

    assert!(registry.is_ready());
    assert_eq!(registry.get_state(Slot::ManualOffline), json!(true));
  }

  #[tokio::test]
  async fn test_corrupt_slot_defaults_without_aborting() {
    let fx = fixture().await;
    fx.durable.set_failing(true);
    fx.registry.set_state(Slot::UomCache, json!({"A": "Nos"})).await;
    fx.fallback.set("offers_cache", "{not json").unwrap();

    let registry = fx.reopen();
    registry.hydrate().await;

    assert!(registry.is_ready());
    assert_eq!(registry.get_state(Slot::OffersCache), json!([]));
    assert_eq!(registry.get_state(Slot::UomCache), json!({"A": "Nos"}));
  }

  #[tokio::test]
  async fn test_getters_return_owned_copies() {
    let fx = fixture().await;
    let mut copy = fx.registry.get_state(Slot::ItemGroupsCache);
    copy.as_array_mut().unwrap().push(json!("Drinks"));

    assert_eq!(fx.registry.get_state(Slot::ItemGroupsCache), json!([]));
  }

  #[tokio::test]
  async fn test_clear_all_cache_resets_and_keeps_version() {
    let fx = fixture().await;
    fx.registry
      .set_state(Slot::SalesPersonsStorage, json!([{"name": "S1"}]))
      .await;

    fx.registry.clear_all_cache().await;

    assert_eq!(fx.registry.get_state(Slot::SalesPersonsStorage), json!([]));
    assert_eq!(fx.durable.get("sales_persons_storage").await.unwrap(), None);
    assert_eq!(
      fx.durable.get("cache_version").await.unwrap(),
      Some(json!(CACHE_VERSION))
    );
    assert!(fx.durable.is_open());
  }

  #[tokio::test]
  async fn test_direct_write_supersedes_batched_write() {
    let fx = fixture().await;
    let key = Slot::ItemDetailsCache.key();

    fx.registry
      .update_state_batched(Slot::ItemDetailsCache, |v| *v = json!({"stale": true}));
    fx.registry
      .set_state(Slot::ItemDetailsCache, json!({"fresh": true}))
      .await;
    tokio::time::sleep(crate::persist::DEFAULT_BATCH_WINDOW * 3).await;

    assert_eq!(fx.durable.get(key).await.unwrap(), Some(json!({"fresh": true})));
    assert_eq!(
      fx.registry.get_state(Slot::ItemDetailsCache),
      json!({"fresh": true})
    );
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_batched_and_direct_writes_converge_on_memory() {
    let fx = fixture().await;
    let key = Slot::ItemDetailsCache.key();

    let mut tasks = Vec::new();
    for i in 0..20 {
      let registry = fx.registry.clone();
      tasks.push(tokio::spawn(async move {
        if i % 2 == 0 {
          registry.update_state_batched(Slot::ItemDetailsCache, |v| *v = json!({"n": i}));
        } else {
          registry.set_state(Slot::ItemDetailsCache, json!({"n": i})).await;
        }
      }));
    }
    for task in tasks {
      task.await.unwrap();
    }
    fx.registry.flush().await;
    tokio::time::sleep(crate::persist::DEFAULT_BATCH_WINDOW * 3).await;

    assert_eq!(
      fx.durable.get(key).await.unwrap(),
      Some(fx.registry.get_state(Slot::ItemDetailsCache))
    );
  }
}
