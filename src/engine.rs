//! Application-facing entry point tying the subsystems together.

use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cache::{CacheRegistry, CacheUsage, EvictionConfig, EvictionManager};
use crate::connectivity::{
  ConnectivityConfig, ConnectivityOracle, ConnectivityState, ReachabilityProbe,
};
use crate::error::Result;
use crate::periodic::PeriodicHandle;
use crate::persist::Persister;
use crate::queue::{
  max_items_from_env, OfflineCustomer, OfflineInvoice, OfflinePayment, OfflineQueues, QueueKind,
};
use crate::remote::{CachedLookups, RemoteService};
use crate::store::{DurableStore, FallbackStore, FileFallback, SqliteStore};
use crate::sync::{FailurePolicy, SyncOrchestrator, SyncTotals};

/// Assembles an [`Engine`] from its stores and collaborators.
pub struct EngineBuilder {
  durable: Arc<dyn DurableStore>,
  fallback: Arc<dyn FallbackStore>,
  remote: Option<Arc<dyn RemoteService>>,
  probe: Option<Arc<dyn ReachabilityProbe>>,
  eviction: EvictionConfig,
  connectivity: ConnectivityConfig,
  max_queue_items: usize,
  policy: FailurePolicy,
  background_writes: bool,
}

impl EngineBuilder {
  pub fn new(durable: Arc<dyn DurableStore>, fallback: Arc<dyn FallbackStore>) -> Self {
    let max_queue_items = max_items_from_env();
    Self {
      durable,
      fallback,
      remote: None,
      probe: None,
      eviction: EvictionConfig {
        max_queue_items,
        ..Default::default()
      },
      connectivity: ConnectivityConfig::default(),
      max_queue_items,
      policy: FailurePolicy::default(),
      background_writes: true,
    }
  }

  /// SQLite database plus file fallback under `data_dir`.
  pub fn at_dir(data_dir: &Path) -> Result<Self> {
    let durable = SqliteStore::new(data_dir.join("offline.db"));
    let fallback = FileFallback::open(data_dir.join("fallback"))?;
    Ok(Self::new(Arc::new(durable), Arc::new(fallback)))
  }

  pub fn remote(mut self, remote: Arc<dyn RemoteService>) -> Self {
    self.remote = Some(remote);
    self
  }

  pub fn probe(mut self, probe: Arc<dyn ReachabilityProbe>) -> Self {
    self.probe = Some(probe);
    self
  }

  pub fn eviction(mut self, eviction: EvictionConfig) -> Self {
    self.max_queue_items = eviction.max_queue_items;
    self.eviction = eviction;
    self
  }

  pub fn connectivity(mut self, connectivity: ConnectivityConfig) -> Self {
    self.connectivity = connectivity;
    self
  }

  pub fn max_queue_items(mut self, max_queue_items: usize) -> Self {
    self.max_queue_items = max_queue_items;
    self.eviction.max_queue_items = max_queue_items;
    self
  }

  pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
    self.policy = policy;
    self
  }

  pub fn background_writes(mut self, enabled: bool) -> Self {
    self.background_writes = enabled;
    self
  }

  /// Open the stores and hydrate the cache. A durable store that fails to
  /// open is logged; the engine then runs from the fallback store.
  pub async fn build(self) -> Engine {
    if let Err(e) = self.durable.open().await {
      warn!(error = %e, "failed to open durable store");
    }

    let persister = Persister::new(self.durable, self.fallback);
    let persister = if self.background_writes {
      persister.with_worker()
    } else {
      persister
    };

    let registry = Arc::new(CacheRegistry::new(Arc::new(persister)));
    registry.hydrate().await;

    let queues = OfflineQueues::with_max_items(registry.clone(), self.max_queue_items);
    let connectivity = Arc::new(ConnectivityOracle::new(registry.clone(), self.connectivity));
    let sync = self.remote.as_ref().map(|remote| {
      Arc::new(
        SyncOrchestrator::new(
          queues.clone(),
          registry.clone(),
          remote.clone(),
          connectivity.clone(),
        )
        .with_policy(self.policy),
      )
    });
    let lookups = self
      .remote
      .map(|remote| CachedLookups::new(remote, registry.clone()));
    let eviction = Arc::new(EvictionManager::new(registry.clone(), self.eviction));

    info!(max_queue_items = queues.max_items(), "offline engine ready");
    Engine {
      registry,
      queues,
      connectivity,
      sync,
      lookups,
      eviction,
      probe: self.probe,
    }
  }
}

/// Owns one instance of every subsystem.
pub struct Engine {
  registry: Arc<CacheRegistry>,
  queues: OfflineQueues,
  connectivity: Arc<ConnectivityOracle>,
  sync: Option<Arc<SyncOrchestrator>>,
  lookups: Option<CachedLookups>,
  eviction: Arc<EvictionManager>,
  probe: Option<Arc<dyn ReachabilityProbe>>,
}

impl Engine {
  pub fn registry(&self) -> &Arc<CacheRegistry> {
    &self.registry
  }

  pub fn queues(&self) -> &OfflineQueues {
    &self.queues
  }

  pub fn oracle(&self) -> &Arc<ConnectivityOracle> {
    &self.connectivity
  }

  /// Reference lookups, when a remote is configured.
  pub fn lookups(&self) -> Option<&CachedLookups> {
    self.lookups.as_ref()
  }

  pub fn eviction(&self) -> &Arc<EvictionManager> {
    &self.eviction
  }

  pub fn has_remote(&self) -> bool {
    self.sync.is_some()
  }

  // --- connectivity -------------------------------------------------------

  pub fn is_offline(&self) -> bool {
    self.connectivity.is_offline()
  }

  pub fn connectivity(&self) -> watch::Receiver<ConnectivityState> {
    self.connectivity.subscribe()
  }

  pub fn connectivity_state(&self) -> ConnectivityState {
    self.connectivity.state()
  }

  pub async fn set_manual_offline(&self, value: bool) {
    self.registry.set_manual_offline(value).await;
    self.connectivity.refresh_manual_offline();
  }

  pub async fn toggle_manual_offline(&self) -> bool {
    let value = self.registry.toggle_manual_offline().await;
    self.connectivity.refresh_manual_offline();
    value
  }

  // --- invoices -----------------------------------------------------------

  pub async fn save_offline_invoice(&self, entry: &OfflineInvoice) -> Result<()> {
    self.queues.save(entry).await
  }

  pub fn get_offline_invoices(&self) -> Vec<OfflineInvoice> {
    self.queues.entries()
  }

  pub async fn clear_offline_invoices(&self) {
    self.queues.clear(QueueKind::Invoices).await
  }

  pub async fn delete_offline_invoice_by_index(&self, index: usize) -> bool {
    self.queues.delete_by_index(QueueKind::Invoices, index).await
  }

  pub fn pending_offline_invoice_count(&self) -> usize {
    self.queues.pending(QueueKind::Invoices)
  }

  // --- payments -----------------------------------------------------------

  pub async fn save_offline_payment(&self, entry: &OfflinePayment) -> Result<()> {
    self.queues.save(entry).await
  }

  pub fn get_offline_payments(&self) -> Vec<OfflinePayment> {
    self.queues.entries()
  }

  pub async fn clear_offline_payments(&self) {
    self.queues.clear(QueueKind::Payments).await
  }

  pub async fn delete_offline_payment_by_index(&self, index: usize) -> bool {
    self.queues.delete_by_index(QueueKind::Payments, index).await
  }

  pub fn pending_offline_payment_count(&self) -> usize {
    self.queues.pending(QueueKind::Payments)
  }

  // --- customers ----------------------------------------------------------

  pub async fn save_offline_customer(&self, entry: &OfflineCustomer) -> Result<()> {
    self.queues.save(entry).await
  }

  pub fn get_offline_customers(&self) -> Vec<OfflineCustomer> {
    self.queues.entries()
  }

  pub async fn clear_offline_customers(&self) {
    self.queues.clear(QueueKind::Customers).await
  }

  pub async fn delete_offline_customer_by_index(&self, index: usize) -> bool {
    self.queues.delete_by_index(QueueKind::Customers, index).await
  }

  /// Empty every queue and forget the last invoice sync totals.
  pub async fn reset_offline_state(&self) {
    self.registry.reset_offline_state().await;
  }

  // --- sync ---------------------------------------------------------------

  /// Without a remote every sync reports the queue as pending.
  pub async fn sync_offline_invoices(&self) -> SyncTotals {
    match &self.sync {
      Some(sync) => sync.sync_invoices().await,
      None => SyncTotals::pending(self.queues.pending(QueueKind::Invoices)),
    }
  }

  pub async fn sync_offline_payments(&self) -> SyncTotals {
    match &self.sync {
      Some(sync) => sync.sync_payments().await,
      None => SyncTotals::pending(self.queues.pending(QueueKind::Payments)),
    }
  }

  pub async fn sync_offline_customers(&self) -> SyncTotals {
    match &self.sync {
      Some(sync) => sync.sync_customers().await,
      None => SyncTotals::pending(self.queues.pending(QueueKind::Customers)),
    }
  }

  // --- cache --------------------------------------------------------------

  pub async fn get_cache_usage_estimate(&self) -> CacheUsage {
    self.registry.usage_estimate().await
  }

  pub async fn clear_all_cache(&self) {
    self.registry.clear_all_cache().await;
    self.connectivity.refresh_manual_offline();
  }

  pub async fn force_clear_all_cache(&self) {
    self.registry.force_clear_all_cache().await;
    self.connectivity.refresh_manual_offline();
  }

  /// Start eviction sweeps, connectivity probing (when a probe is set) and
  /// sync-on-reconnect (when a remote is set).
  pub fn spawn_daemon(&self) -> Daemon {
    let mut handles = vec![self.eviction.clone().spawn()];

    if let Some(probe) = &self.probe {
      handles.push(self.connectivity.clone().spawn_probe_loop(probe.clone()));
    }
    if let Some(sync) = &self.sync {
      handles.push(spawn_reconnect_sync(
        sync.clone(),
        self.connectivity.subscribe(),
        self.connectivity.is_offline(),
      ));
    }

    info!(tasks = handles.len(), "daemon started");
    Daemon { handles }
  }

  /// Write out batched and queued persistence, then close the durable store.
  pub async fn shutdown(&self) {
    self.registry.flush().await;
    let persister = self.registry.persister();
    persister.drain_worker().await;
    persister.durable().close().await;
    debug!("engine shut down");
  }
}

async fn sync_all(sync: &SyncOrchestrator) {
  let invoices = sync.sync_invoices().await;
  let payments = sync.sync_payments().await;
  info!(
    invoices_synced = invoices.synced,
    invoices_pending = invoices.pending,
    payments_synced = payments.synced,
    payments_pending = payments.pending,
    "background sync finished"
  );
}

/// Sync once at start when online, then on every offline to online edge.
fn spawn_reconnect_sync(
  sync: Arc<SyncOrchestrator>,
  mut rx: watch::Receiver<ConnectivityState>,
  initially_offline: bool,
) -> PeriodicHandle {
  PeriodicHandle::spawn(move |mut stop| async move {
    if !initially_offline {
      sync_all(&sync).await;
    }
    let mut was_offline = initially_offline;
    loop {
      tokio::select! {
        _ = stop.stopped() => break,
        changed = rx.changed() => {
          if changed.is_err() {
            break;
          }
        }
      }
      let offline = rx.borrow_and_update().offline();
      if was_offline && !offline {
        info!("back online, syncing queued mutations");
        sync_all(&sync).await;
      }
      was_offline = offline;
    }
    debug!("reconnect sync stopped");
  })
}

/// Background tasks started by [`Engine::spawn_daemon`].
pub struct Daemon {
  handles: Vec<PeriodicHandle>,
}

impl Daemon {
  /// Prevent every task's next run.
  pub fn stop(&self) {
    for handle in &self.handles {
      handle.stop();
    }
  }

  pub async fn shutdown(self) {
    for handle in self.handles {
      handle.shutdown().await;
    }
  }
}
