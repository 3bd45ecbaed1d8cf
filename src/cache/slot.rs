//! Named cache slots and their defaults.

use serde_json::{json, Value};

/// Compiled-in cache layout version. Bump whenever a slot's shape changes.
pub const CACHE_VERSION: i64 = 1;

/// Every named value the registry keeps in memory and persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Slot {
  OfflineInvoices,
  OfflineCustomers,
  OfflinePayments,
  LastSyncTotals,
  UomCache,
  OffersCache,
  OffersCacheTimestamp,
  CustomerBalanceCache,
  LocalStockCache,
  StockCacheReady,
  CustomerStorage,
  OpeningStorage,
  OpeningDialogStorage,
  SalesPersonsStorage,
  ItemDetailsCache,
  TaxTemplateCache,
  TranslationCache,
  CouponsCache,
  ItemGroupsCache,
  PriceListCurrencyCache,
  ItemsLastSync,
  CustomersLastSync,
  CacheVersion,
  TaxInclusive,
  ManualOffline,
}

impl Slot {
  pub const ALL: [Slot; 25] = [
    Slot::OfflineInvoices,
    Slot::OfflineCustomers,
    Slot::OfflinePayments,
    Slot::LastSyncTotals,
    Slot::UomCache,
    Slot::OffersCache,
    Slot::OffersCacheTimestamp,
    Slot::CustomerBalanceCache,
    Slot::LocalStockCache,
    Slot::StockCacheReady,
    Slot::CustomerStorage,
    Slot::OpeningStorage,
    Slot::OpeningDialogStorage,
    Slot::SalesPersonsStorage,
    Slot::ItemDetailsCache,
    Slot::TaxTemplateCache,
    Slot::TranslationCache,
    Slot::CouponsCache,
    Slot::ItemGroupsCache,
    Slot::PriceListCurrencyCache,
    Slot::ItemsLastSync,
    Slot::CustomersLastSync,
    Slot::CacheVersion,
    Slot::TaxInclusive,
    Slot::ManualOffline,
  ];

  /// Slots that are safe to discard once every queued mutation has synced.
  pub const REDUCIBLE: [Slot; 9] = [
    Slot::ItemDetailsCache,
    Slot::UomCache,
    Slot::OffersCache,
    Slot::OffersCacheTimestamp,
    Slot::CustomerBalanceCache,
    Slot::LocalStockCache,
    Slot::StockCacheReady,
    Slot::CouponsCache,
    Slot::ItemGroupsCache,
  ];

  /// Storage key, shared by the durable and fallback stores.
  pub fn key(self) -> &'static str {
    match self {
      Slot::OfflineInvoices => "offline_invoices",
      Slot::OfflineCustomers => "offline_customers",
      Slot::OfflinePayments => "offline_payments",
      Slot::LastSyncTotals => "pos_last_sync_totals",
      Slot::UomCache => "uom_cache",
      Slot::OffersCache => "offers_cache",
      Slot::OffersCacheTimestamp => "offers_cache_timestamp",
      Slot::CustomerBalanceCache => "customer_balance_cache",
      Slot::LocalStockCache => "local_stock_cache",
      Slot::StockCacheReady => "stock_cache_ready",
      Slot::CustomerStorage => "customer_storage",
      Slot::OpeningStorage => "pos_opening_storage",
      Slot::OpeningDialogStorage => "opening_dialog_storage",
      Slot::SalesPersonsStorage => "sales_persons_storage",
      Slot::ItemDetailsCache => "item_details_cache",
      Slot::TaxTemplateCache => "tax_template_cache",
      Slot::TranslationCache => "translation_cache",
      Slot::CouponsCache => "coupons_cache",
      Slot::ItemGroupsCache => "item_groups_cache",
      Slot::PriceListCurrencyCache => "price_list_currency_cache",
      Slot::ItemsLastSync => "items_last_sync",
      Slot::CustomersLastSync => "customers_last_sync",
      Slot::CacheVersion => "cache_version",
      Slot::TaxInclusive => "tax_inclusive",
      Slot::ManualOffline => "manual_offline",
    }
  }

  pub fn from_key(key: &str) -> Option<Slot> {
    Slot::ALL.into_iter().find(|slot| slot.key() == key)
  }

  /// Value a slot holds when nothing was stored or after a reset.
  pub fn default_value(self) -> Value {
    match self {
      Slot::OfflineInvoices
      | Slot::OfflineCustomers
      | Slot::OfflinePayments
      | Slot::OffersCache
      | Slot::CustomerStorage
      | Slot::SalesPersonsStorage
      | Slot::ItemGroupsCache => json!([]),
      Slot::UomCache
      | Slot::CustomerBalanceCache
      | Slot::LocalStockCache
      | Slot::ItemDetailsCache
      | Slot::TaxTemplateCache
      | Slot::TranslationCache
      | Slot::CouponsCache
      | Slot::PriceListCurrencyCache => json!({}),
      Slot::LastSyncTotals => json!({"pending": 0, "synced": 0, "drafted": 0}),
      Slot::OffersCacheTimestamp => json!(0),
      Slot::StockCacheReady | Slot::TaxInclusive | Slot::ManualOffline => json!(false),
      Slot::OpeningStorage
      | Slot::OpeningDialogStorage
      | Slot::ItemsLastSync
      | Slot::CustomersLastSync => Value::Null,
      Slot::CacheVersion => json!(CACHE_VERSION),
    }
  }
}

impl std::fmt::Display for Slot {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.key())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashSet;

  #[test]
  fn test_keys_are_unique_and_round_trip() {
    let keys: HashSet<_> = Slot::ALL.iter().map(|s| s.key()).collect();
    assert_eq!(keys.len(), Slot::ALL.len());

    for slot in Slot::ALL {
      assert_eq!(Slot::from_key(slot.key()), Some(slot));
    }
    assert_eq!(Slot::from_key("nope"), None);
  }

  #[test]
  fn test_queues_default_to_empty_lists() {
    for slot in [Slot::OfflineInvoices, Slot::OfflinePayments, Slot::OfflineCustomers] {
      assert_eq!(slot.default_value(), json!([]));
    }
  }
}
