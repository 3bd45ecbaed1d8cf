//! Periodic TTL sweeps over the registry.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::helpers::CUSTOMER_BALANCE_TTL;
use super::now_millis;
use super::registry::CacheRegistry;
use super::slot::Slot;
use crate::periodic::PeriodicHandle;
use crate::queue::{trim_oldest, QueueKind, DEFAULT_MAX_QUEUE_ITEMS};

#[derive(Debug, Clone)]
pub struct EvictionConfig {
  pub interval: Duration,
  pub offers_ttl: Duration,
  pub item_details_ttl: Duration,
  pub customer_balance_ttl: Duration,
  pub max_queue_items: usize,
}

impl Default for EvictionConfig {
  fn default() -> Self {
    Self {
      interval: Duration::from_secs(5 * 60),
      offers_ttl: Duration::from_secs(15 * 60),
      item_details_ttl: Duration::from_secs(15 * 60),
      customer_balance_ttl: CUSTOMER_BALANCE_TTL,
      max_queue_items: DEFAULT_MAX_QUEUE_ITEMS,
    }
  }
}

/// What one sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
  pub offers_dropped: bool,
  pub item_details_removed: usize,
  pub balances_removed: usize,
  pub queue_entries_trimmed: usize,
}

impl SweepReport {
  pub fn is_empty(&self) -> bool {
    *self == Self::default()
  }
}

fn expired(entry: &Value, now: i64, ttl: Duration) -> bool {
  entry
    .get("timestamp")
    .and_then(Value::as_i64)
    .is_some_and(|ts| now - ts > ttl.as_millis() as i64)
}

/// Remove stale leaves of the profile -> price list -> item code tree and any
/// parent left empty. Returns how many leaves were removed.
fn prune_item_details(cache: &mut Value, now: i64, ttl: Duration) -> usize {
  let Some(profiles) = cache.as_object_mut() else {
    return 0;
  };

  let mut removed = 0;
  for price_lists in profiles.values_mut() {
    let Some(price_lists) = price_lists.as_object_mut() else {
      continue;
    };
    for items in price_lists.values_mut() {
      let Some(items) = items.as_object_mut() else {
        continue;
      };
      let before = items.len();
      items.retain(|_, entry| !expired(entry, now, ttl));
      removed += before - items.len();
    }
    price_lists.retain(|_, items| items.as_object().map_or(true, |m| !m.is_empty()));
  }
  profiles.retain(|_, lists| lists.as_object().map_or(true, |m| !m.is_empty()));
  removed
}

fn prune_balances(cache: &mut Value, now: i64, ttl: Duration) -> usize {
  let Some(balances) = cache.as_object_mut() else {
    return 0;
  };
  let before = balances.len();
  balances.retain(|_, entry| !expired(entry, now, ttl));
  before - balances.len()
}

pub struct EvictionManager {
  registry: Arc<CacheRegistry>,
  config: EvictionConfig,
}

impl EvictionManager {
  pub fn new(registry: Arc<CacheRegistry>, config: EvictionConfig) -> Self {
    Self { registry, config }
  }

  pub fn config(&self) -> &EvictionConfig {
    &self.config
  }

  pub async fn sweep(&self) -> SweepReport {
    self.sweep_at(now_millis()).await
  }

  /// Run one sweep as if the current time were `now` (milliseconds).
  ///
  /// Only slots that actually change are written back, so a second sweep at
  /// the same instant performs no writes.
  pub async fn sweep_at(&self, now: i64) -> SweepReport {
    let mut report = SweepReport::default();
    let registry = &self.registry;

    let offers_ts = registry
      .get_state(Slot::OffersCacheTimestamp)
      .as_i64()
      .unwrap_or(0);
    if offers_ts > 0 && now - offers_ts > self.config.offers_ttl.as_millis() as i64 {
      registry.set_state(Slot::OffersCache, json!([])).await;
      registry.set_state(Slot::OffersCacheTimestamp, json!(0)).await;
      report.offers_dropped = true;
    }

    let ttl = self.config.item_details_ttl;
    let mut probe = registry.get_state(Slot::ItemDetailsCache);
    if prune_item_details(&mut probe, now, ttl) > 0 {
      report.item_details_removed = registry
        .update_state(Slot::ItemDetailsCache, |cache| prune_item_details(cache, now, ttl))
        .await;
    }

    let ttl = self.config.customer_balance_ttl;
    let mut probe = registry.get_state(Slot::CustomerBalanceCache);
    if prune_balances(&mut probe, now, ttl) > 0 {
      report.balances_removed = registry
        .update_state(Slot::CustomerBalanceCache, |cache| prune_balances(cache, now, ttl))
        .await;
    }

    let limit = self.config.max_queue_items;
    for kind in QueueKind::ALL {
      let over = registry
        .get_state(kind.slot())
        .as_array()
        .is_some_and(|entries| entries.len() > limit);
      if over {
        let trimmed = registry
          .update_state(kind.slot(), |entries| trim_oldest(entries, limit))
          .await;
        info!(queue = %kind, trimmed, limit, "trimmed oversized offline queue");
        report.queue_entries_trimmed += trimmed;
      }
    }

    debug!(?report, "cache eviction sweep finished");
    report
  }

  /// Start sweeping on the configured interval once the registry is ready.
  pub fn spawn(self: Arc<Self>) -> PeriodicHandle {
    PeriodicHandle::spawn(move |mut stop| async move {
      self.registry.wait_ready().await;
      while stop.sleep(self.config.interval).await {
        self.sweep().await;
      }
      debug!("cache eviction stopped");
    })
  }
}
