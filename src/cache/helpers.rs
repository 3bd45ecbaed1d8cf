//! Typed accessors over the generic slot API.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{info, warn};

use super::now_millis;
use super::registry::CacheRegistry;
use super::slot::Slot;
use crate::error::Result;
use crate::persist::structural_clone;
use crate::sync::SyncTotals;

/// How long cached customer balances stay valid.
pub const CUSTOMER_BALANCE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// How long cached gift coupons stay valid.
pub const COUPON_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// How long cached translation bundles stay valid.
pub const TRANSLATION_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Customer fields kept in the local roster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerContact {
  pub name: String,
  #[serde(default)]
  pub customer_name: Option<String>,
  #[serde(default)]
  pub mobile_no: Option<String>,
  #[serde(default)]
  pub email_id: Option<String>,
  #[serde(default)]
  pub primary_address: Option<String>,
  #[serde(default)]
  pub tax_id: Option<String>,
}

/// Ensure `value` is an object and return it mutably.
pub(crate) fn object_mut(value: &mut Value) -> &mut Map<String, Value> {
  if !value.is_object() {
    *value = Value::Object(Map::new());
  }
  match value {
    Value::Object(map) => map,
    _ => unreachable!("value was just replaced by an object"),
  }
}

/// Read `field` of a timestamped entry if it is younger than `ttl`.
fn fresh_field(entry: Option<&Value>, field: &str, ttl: Duration, now: i64) -> Option<Value> {
  let entry = entry?;
  let timestamp = entry.get("timestamp")?.as_i64()?;
  if now - timestamp < ttl.as_millis() as i64 {
    entry.get(field).cloned()
  } else {
    None
  }
}

impl CacheRegistry {
  // --- customers ----------------------------------------------------------

  pub fn customer_storage(&self) -> Vec<CustomerContact> {
    serde_json::from_value(self.get_state(Slot::CustomerStorage)).unwrap_or_default()
  }

  /// Store the customer roster, trimmed to contact fields.
  pub async fn set_customer_storage<T: Serialize>(&self, customers: &[T]) -> Result<()> {
    let raw = structural_clone(Slot::CustomerStorage.key(), customers)?;
    let trimmed: Vec<CustomerContact> = raw
      .as_array()
      .map(|list| {
        list
          .iter()
          .filter_map(|c| match serde_json::from_value(c.clone()) {
            Ok(contact) => Some(contact),
            Err(e) => {
              warn!(error = %e, "skipping malformed customer");
              None
            }
          })
          .collect()
      })
      .unwrap_or_default();

    self
      .set_state(Slot::CustomerStorage, structural_clone(Slot::CustomerStorage.key(), &trimmed)?)
      .await;
    Ok(())
  }

  pub fn customers_last_sync(&self) -> Option<String> {
    self.get_state(Slot::CustomersLastSync).as_str().map(String::from)
  }

  pub async fn set_customers_last_sync(&self, timestamp: &str) {
    self.set_state(Slot::CustomersLastSync, json!(timestamp)).await;
  }

  pub fn items_last_sync(&self) -> Option<String> {
    self.get_state(Slot::ItemsLastSync).as_str().map(String::from)
  }

  pub async fn set_items_last_sync(&self, timestamp: &str) {
    self.set_state(Slot::ItemsLastSync, json!(timestamp)).await;
  }

  /// Cached balance for `customer`, if cached within the last 24 hours.
  pub fn customer_balance(&self, customer: &str) -> Option<Value> {
    let cache = self.get_state(Slot::CustomerBalanceCache);
    fresh_field(cache.get(customer), "balance", CUSTOMER_BALANCE_TTL, now_millis())
  }

  pub async fn set_customer_balance(&self, customer: &str, balance: Value) {
    let entry = json!({"balance": balance, "timestamp": now_millis()});
    self
      .update_state(Slot::CustomerBalanceCache, |cache| {
        object_mut(cache).insert(customer.to_string(), entry);
      })
      .await;
  }

  // --- staff and shift ----------------------------------------------------

  pub fn sales_persons(&self) -> Vec<Value> {
    serde_json::from_value(self.get_state(Slot::SalesPersonsStorage)).unwrap_or_default()
  }

  pub async fn set_sales_persons<T: Serialize + ?Sized>(&self, persons: &T) -> Result<()> {
    let clean = structural_clone(Slot::SalesPersonsStorage.key(), persons)?;
    self.set_state(Slot::SalesPersonsStorage, clean).await;
    Ok(())
  }

  /// Snapshot of the open shift, if any.
  pub fn opening_storage(&self) -> Option<Value> {
    Some(self.get_state(Slot::OpeningStorage)).filter(|v| !v.is_null())
  }

  pub async fn set_opening_storage<T: Serialize + ?Sized>(&self, shift: &T) -> Result<()> {
    let clean = structural_clone(Slot::OpeningStorage.key(), shift)?;
    self.set_state(Slot::OpeningStorage, clean).await;
    Ok(())
  }

  /// Forget the shift snapshot once the shift is closed.
  pub async fn clear_opening_storage(&self) {
    self.set_state(Slot::OpeningStorage, Value::Null).await;
  }

  pub fn opening_dialog_storage(&self) -> Option<Value> {
    Some(self.get_state(Slot::OpeningDialogStorage)).filter(|v| !v.is_null())
  }

  pub async fn set_opening_dialog_storage<T: Serialize + ?Sized>(&self, data: &T) -> Result<()> {
    let clean = structural_clone(Slot::OpeningDialogStorage.key(), data)?;
    self.set_state(Slot::OpeningDialogStorage, clean).await;
    Ok(())
  }

  // --- reference data -----------------------------------------------------

  pub fn tax_template(&self, name: &str) -> Option<Value> {
    self.get_state(Slot::TaxTemplateCache).get(name).cloned()
  }

  pub async fn set_tax_template<T: Serialize + ?Sized>(&self, name: &str, doc: &T) -> Result<()> {
    let clean = structural_clone(Slot::TaxTemplateCache.key(), doc)?;
    self
      .update_state(Slot::TaxTemplateCache, |cache| {
        object_mut(cache).insert(name.to_string(), clean);
      })
      .await;
    Ok(())
  }

  /// Translation bundle for `lang`, if cached within the last 7 days.
  pub fn translations(&self, lang: &str) -> Option<Value> {
    let cache = self.get_state(Slot::TranslationCache);
    fresh_field(cache.get(lang), "messages", TRANSLATION_TTL, now_millis())
  }

  pub async fn set_translations<T: Serialize + ?Sized>(&self, lang: &str, messages: &T) -> Result<()> {
    let clean = structural_clone(Slot::TranslationCache.key(), messages)?;
    let entry = json!({"messages": clean, "timestamp": now_millis()});
    self
      .update_state(Slot::TranslationCache, |cache| {
        object_mut(cache).insert(lang.to_string(), entry);
      })
      .await;
    Ok(())
  }

  /// Gift coupons for `customer`, if cached within the last 24 hours.
  pub fn gift_coupons(&self, customer: &str) -> Option<Value> {
    let cache = self.get_state(Slot::CouponsCache);
    fresh_field(cache.get(customer), "coupons", COUPON_TTL, now_millis())
  }

  pub async fn set_gift_coupons<T: Serialize + ?Sized>(&self, customer: &str, coupons: &T) -> Result<()> {
    let clean = structural_clone(Slot::CouponsCache.key(), coupons)?;
    let entry = json!({"coupons": clean, "timestamp": now_millis()});
    self
      .update_state(Slot::CouponsCache, |cache| {
        object_mut(cache).insert(customer.to_string(), entry);
      })
      .await;
    Ok(())
  }

  pub fn item_groups(&self) -> Vec<Value> {
    serde_json::from_value(self.get_state(Slot::ItemGroupsCache)).unwrap_or_default()
  }

  pub async fn set_item_groups<T: Serialize + ?Sized>(&self, groups: &T) -> Result<()> {
    let clean = structural_clone(Slot::ItemGroupsCache.key(), groups)?;
    self.set_state(Slot::ItemGroupsCache, clean).await;
    Ok(())
  }

  pub fn price_list_currency(&self, price_list: &str) -> Option<String> {
    self
      .get_state(Slot::PriceListCurrencyCache)
      .get(price_list)
      .and_then(Value::as_str)
      .map(String::from)
  }

  pub async fn set_price_list_currency(&self, price_list: &str, currency: &str) {
    self
      .update_state(Slot::PriceListCurrencyCache, |cache| {
        object_mut(cache).insert(price_list.to_string(), json!(currency));
      })
      .await;
  }

  // --- pricing caches -----------------------------------------------------

  pub fn offers(&self) -> Vec<Value> {
    serde_json::from_value(self.get_state(Slot::OffersCache)).unwrap_or_default()
  }

  /// Replace the offers list and stamp it with the current time.
  pub async fn set_offers<T: Serialize + ?Sized>(&self, offers: &T) -> Result<()> {
    let clean = structural_clone(Slot::OffersCache.key(), offers)?;
    self.set_state(Slot::OffersCache, clean).await;
    self
      .set_state(Slot::OffersCacheTimestamp, json!(now_millis()))
      .await;
    Ok(())
  }

  /// Cached item details for one item under a profile and price list.
  pub fn item_details(&self, profile: &str, price_list: &str, item_code: &str) -> Option<Value> {
    self
      .get_state(Slot::ItemDetailsCache)
      .get(profile)?
      .get(price_list)?
      .get(item_code)?
      .get("data")
      .cloned()
  }

  /// Cache item details. Bursts of lookups are persisted in one batch.
  ///
  /// Must be called from within a tokio runtime.
  pub fn set_item_details<T: Serialize + ?Sized>(
    &self,
    profile: &str,
    price_list: &str,
    item_code: &str,
    details: &T,
  ) -> Result<()> {
    let clean = structural_clone(Slot::ItemDetailsCache.key(), details)?;
    let entry = json!({"data": clean, "timestamp": now_millis()});
    self.update_state_batched(Slot::ItemDetailsCache, |cache| {
      let by_price_list = object_mut(cache)
        .entry(profile.to_string())
        .or_insert_with(|| json!({}));
      let by_item = object_mut(by_price_list)
        .entry(price_list.to_string())
        .or_insert_with(|| json!({}));
      object_mut(by_item).insert(item_code.to_string(), entry);
    });
    Ok(())
  }

  pub fn uom(&self, item_code: &str) -> Option<Value> {
    self.get_state(Slot::UomCache).get(item_code).cloned()
  }

  pub async fn set_uom<T: Serialize + ?Sized>(&self, item_code: &str, uoms: &T) -> Result<()> {
    let clean = structural_clone(Slot::UomCache.key(), uoms)?;
    self
      .update_state(Slot::UomCache, |cache| {
        object_mut(cache).insert(item_code.to_string(), clean);
      })
      .await;
    Ok(())
  }

  // --- flags --------------------------------------------------------------

  pub fn tax_inclusive(&self) -> bool {
    self.get_state(Slot::TaxInclusive).as_bool().unwrap_or(false)
  }

  pub async fn set_tax_inclusive(&self, value: bool) {
    self.set_state(Slot::TaxInclusive, json!(value)).await;
  }

  pub fn manual_offline(&self) -> bool {
    self.get_state(Slot::ManualOffline).as_bool().unwrap_or(false)
  }

  pub async fn set_manual_offline(&self, value: bool) {
    info!(manual_offline = value, "manual offline mode changed");
    self.set_state(Slot::ManualOffline, json!(value)).await;
  }

  /// Flip manual offline mode and return the new value.
  pub async fn toggle_manual_offline(&self) -> bool {
    let value = !self.manual_offline();
    self.set_manual_offline(value).await;
    value
  }

  // --- sync bookkeeping ---------------------------------------------------

  pub fn last_sync_totals(&self) -> SyncTotals {
    serde_json::from_value(self.get_state(Slot::LastSyncTotals)).unwrap_or_default()
  }

  pub async fn set_last_sync_totals(&self, totals: SyncTotals) {
    self.set_state(Slot::LastSyncTotals, json!(totals)).await;
  }

  /// Empty all three queues and the last sync totals.
  pub async fn reset_offline_state(&self) {
    for slot in [Slot::OfflineInvoices, Slot::OfflineCustomers, Slot::OfflinePayments] {
      self.set_state(slot, json!([])).await;
    }
    self.set_last_sync_totals(SyncTotals::default()).await;
  }

  /// Whether any queue holds more than `limit` entries.
  pub fn queue_health_check(&self, limit: usize) -> bool {
    [Slot::OfflineInvoices, Slot::OfflineCustomers, Slot::OfflinePayments]
      .into_iter()
      .any(|slot| {
        self
          .get_state(slot)
          .as_array()
          .is_some_and(|entries| entries.len() > limit)
      })
  }

  /// Drop caches that are cheap to rebuild once the queues have drained.
  pub async fn reduce_cache_usage(&self) {
    for slot in Slot::REDUCIBLE {
      self.set_state(slot, slot.default_value()).await;
    }
    info!("reduced cache usage after sync");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::fixture;

  #[tokio::test]
  async fn test_customer_roster_is_trimmed() {
    let fx = fixture().await;
    let customers = vec![json!({
      "name": "C-0001",
      "customer_name": "Ada",
      "mobile_no": "555",
      "loyalty_program": "Gold",
      "addresses": [{"line": "big nested blob"}]
    })];

    fx.registry.set_customer_storage(&customers).await.unwrap();

    let stored = fx.registry.get_state(Slot::CustomerStorage);
    assert!(stored[0].get("loyalty_program").is_none());
    assert!(stored[0].get("addresses").is_none());
    assert_eq!(
      fx.registry.customer_storage(),
      vec![CustomerContact {
        name: "C-0001".into(),
        customer_name: Some("Ada".into()),
        mobile_no: Some("555".into()),
        ..Default::default()
      }]
    );
  }

  #[tokio::test]
  async fn test_expired_coupons_are_not_returned() {
    let fx = fixture().await;
    fx.registry.set_gift_coupons("C1", &json!(["GIFT10"])).await.unwrap();
    assert_eq!(fx.registry.gift_coupons("C1"), Some(json!(["GIFT10"])));

    let stale = now_millis() - COUPON_TTL.as_millis() as i64 - 1;
    fx.registry
      .set_state(
        Slot::CouponsCache,
        json!({"C1": {"coupons": ["GIFT10"], "timestamp": stale}}),
      )
      .await;
    assert_eq!(fx.registry.gift_coupons("C1"), None);
  }

  #[tokio::test]
  async fn test_tax_templates_and_translations() {
    let fx = fixture().await;
    fx.registry
      .set_tax_template("VAT 15%", &json!({"taxes": [{"rate": 15}]}))
      .await
      .unwrap();
    fx.registry
      .set_translations("de", &json!({"Pay": "Bezahlen"}))
      .await
      .unwrap();

    assert_eq!(
      fx.registry.tax_template("VAT 15%"),
      Some(json!({"taxes": [{"rate": 15}]}))
    );
    assert_eq!(fx.registry.tax_template("missing"), None);
    assert_eq!(fx.registry.translations("de"), Some(json!({"Pay": "Bezahlen"})));
  }

  #[tokio::test]
  async fn test_item_details_are_nested_and_batched() {
    let fx = fixture().await;
    let writes_before = fx.durable.write_count();

    fx.registry
      .set_item_details("Main", "Standard Selling", "A", &json!({"rate": 10}))
      .unwrap();
    fx.registry
      .set_item_details("Main", "Standard Selling", "B", &json!({"rate": 12}))
      .unwrap();

    assert_eq!(
      fx.registry.item_details("Main", "Standard Selling", "B"),
      Some(json!({"rate": 12}))
    );

    fx.registry.flush().await;
    assert_eq!(fx.durable.write_count(), writes_before + 1);
  }

  #[tokio::test]
  async fn test_shift_snapshot_and_manual_offline() {
    let fx = fixture().await;
    assert_eq!(fx.registry.opening_storage(), None);

    fx.registry
      .set_opening_storage(&json!({"pos_profile": "Main"}))
      .await
      .unwrap();
    assert!(fx.registry.opening_storage().is_some());
    fx.registry.clear_opening_storage().await;
    assert_eq!(fx.registry.opening_storage(), None);

    assert!(fx.registry.toggle_manual_offline().await);
    assert!(fx.registry.manual_offline());
  }

  #[tokio::test]
  async fn test_reduce_cache_usage_keeps_queues() {
    let fx = fixture().await;
    fx.registry
      .set_state(Slot::OfflineInvoices, json!([{"invoice": {"items": [1]}}]))
      .await;
    fx.registry.set_offers(&json!([{"name": "promo"}])).await.unwrap();
    fx.registry.set_uom("A", &json!(["Nos"])).await.unwrap();

    fx.registry.reduce_cache_usage().await;

    assert!(fx.registry.offers().is_empty());
    assert_eq!(fx.registry.uom("A"), None);
    assert_eq!(fx.registry.get_state(Slot::OffersCacheTimestamp), json!(0));
    assert_eq!(
      fx.registry.get_state(Slot::OfflineInvoices).as_array().map(Vec::len),
      Some(1)
    );
  }

  #[tokio::test]
  async fn test_queue_health_check() {
    let fx = fixture().await;
    fx.registry
      .set_state(Slot::OfflinePayments, json!([{}, {}, {}]))
      .await;

    assert!(fx.registry.queue_health_check(2));
    assert!(!fx.registry.queue_health_check(3));
  }

  #[tokio::test]
  async fn test_reset_offline_state_empties_queues_and_totals() {
    let fx = fixture().await;
    for slot in [Slot::OfflineInvoices, Slot::OfflineCustomers, Slot::OfflinePayments] {
      fx.registry.set_state(slot, json!([{}, {}])).await;
    }
    fx.registry
      .set_last_sync_totals(SyncTotals {
        pending: 2,
        synced: 1,
        drafted: 1,
      })
      .await;
    fx.registry.set_offers(&json!([{"name": "promo"}])).await.unwrap();

    fx.registry.reset_offline_state().await;

    let reopened = fx.reopen();
    reopened.hydrate().await;
    for registry in [&fx.registry, &reopened] {
      assert!(!registry.queue_health_check(0));
      assert_eq!(registry.last_sync_totals(), SyncTotals::default());
      assert_eq!(registry.offers().len(), 1);
    }
  }
}
