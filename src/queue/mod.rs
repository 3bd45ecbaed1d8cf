//! Bounded FIFO queues of mutations waiting for the remote.

mod entry;

pub use entry::{
  CustomerArgs, InvoiceDoc, OfflineCustomer, OfflineInvoice, OfflinePayment, QueueEntry,
  PAYMENT_PROFILE_FIELDS,
};

use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{CacheRegistry, Slot};
use crate::error::{OfflineError, Result};
use crate::persist::structural_clone;

pub const DEFAULT_MAX_QUEUE_ITEMS: usize = 1000;

/// Environment override for the queue cap.
pub const MAX_QUEUE_ITEMS_ENV: &str = "POSYNC_MAX_QUEUE_ITEMS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
  Invoices,
  Payments,
  Customers,
}

impl QueueKind {
  pub const ALL: [QueueKind; 3] = [QueueKind::Invoices, QueueKind::Payments, QueueKind::Customers];

  pub fn slot(self) -> Slot {
    match self {
      QueueKind::Invoices => Slot::OfflineInvoices,
      QueueKind::Payments => Slot::OfflinePayments,
      QueueKind::Customers => Slot::OfflineCustomers,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      QueueKind::Invoices => "invoices",
      QueueKind::Payments => "payments",
      QueueKind::Customers => "customers",
    }
  }
}

impl std::fmt::Display for QueueKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for QueueKind {
  type Err = OfflineError;

  fn from_str(s: &str) -> Result<Self> {
    QueueKind::ALL
      .into_iter()
      .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
      .ok_or_else(|| OfflineError::Validation(format!("unknown queue: {s}")))
  }
}

/// Ensure `value` is an array and return it mutably.
fn list_mut(value: &mut Value) -> &mut Vec<Value> {
  if !value.is_array() {
    *value = Value::Array(Vec::new());
  }
  match value {
    Value::Array(list) => list,
    _ => unreachable!("value was just replaced by an array"),
  }
}

/// Drop the oldest entries of a queue until at most `limit` remain.
/// Returns how many were dropped.
pub(crate) fn trim_oldest(queue: &mut Value, limit: usize) -> usize {
  let list = list_mut(queue);
  let excess = list.len().saturating_sub(limit);
  list.drain(..excess);
  excess
}

/// Queue cap from [`MAX_QUEUE_ITEMS_ENV`], or the default when unset or not a
/// positive integer.
pub fn max_items_from_env() -> usize {
  std::env::var(MAX_QUEUE_ITEMS_ENV)
    .ok()
    .and_then(|raw| raw.trim().parse::<usize>().ok())
    .filter(|n| *n > 0)
    .unwrap_or(DEFAULT_MAX_QUEUE_ITEMS)
}

/// The invoice, payment and customer queues, stored in registry slots.
#[derive(Clone)]
pub struct OfflineQueues {
  registry: Arc<CacheRegistry>,
  max_items: usize,
}

impl OfflineQueues {
  pub fn new(registry: Arc<CacheRegistry>) -> Self {
    Self::with_max_items(registry, max_items_from_env())
  }

  pub fn with_max_items(registry: Arc<CacheRegistry>, max_items: usize) -> Self {
    Self {
      registry,
      max_items: max_items.max(1),
    }
  }

  pub fn max_items(&self) -> usize {
    self.max_items
  }

  /// Validate, reduce and append an entry, dropping the oldest entries past
  /// the cap. Nothing is stored if validation or serialization fails.
  pub async fn save<T: QueueEntry>(&self, entry: &T) -> Result<()> {
    entry.validate()?;

    let mut reduced = entry.clone();
    reduced.reduce();
    let slot = T::KIND.slot();
    let clean = structural_clone(slot.key(), &reduced)?;

    let limit = self.max_items;
    let dropped = self
      .registry
      .update_state(slot, |queue| {
        list_mut(queue).push(clean);
        trim_oldest(queue, limit)
      })
      .await;

    if dropped > 0 {
      warn!(queue = %T::KIND, dropped, limit, "offline queue full, dropped oldest entries");
    }
    debug!(queue = %T::KIND, "queued offline entry");
    Ok(())
  }

  /// Owned copies of every well-formed entry, oldest first.
  pub fn entries<T: QueueEntry>(&self) -> Vec<T> {
    self
      .raw_entries(T::KIND)
      .into_iter()
      .filter_map(|raw| match serde_json::from_value(raw) {
        Ok(entry) => Some(entry),
        Err(e) => {
          warn!(queue = %T::KIND, error = %e, "skipping malformed queue entry");
          None
        }
      })
      .collect()
  }

  pub fn raw_entries(&self, kind: QueueKind) -> Vec<Value> {
    match self.registry.get_state(kind.slot()) {
      Value::Array(list) => list,
      _ => Vec::new(),
    }
  }

  pub fn pending(&self, kind: QueueKind) -> usize {
    self
      .registry
      .get_state(kind.slot())
      .as_array()
      .map_or(0, Vec::len)
  }

  pub async fn clear(&self, kind: QueueKind) {
    self.registry.set_state(kind.slot(), Value::Array(Vec::new())).await;
  }

  /// Remove the entry at `index`. An out-of-range index changes nothing and
  /// returns `false`.
  pub async fn delete_by_index(&self, kind: QueueKind, index: usize) -> bool {
    if index >= self.pending(kind) {
      return false;
    }
    self
      .registry
      .update_state(kind.slot(), |queue| {
        let list = list_mut(queue);
        if index < list.len() {
          list.remove(index);
          true
        } else {
          false
        }
      })
      .await
  }

  /// Remove the first entry equal to `entry` after the remote confirmed it.
  pub(crate) async fn remove_confirmed(&self, kind: QueueKind, entry: &Value) -> bool {
    let removed = self
      .registry
      .update_state(kind.slot(), |queue| {
        let list = list_mut(queue);
        match list.iter().position(|queued| queued == entry) {
          Some(pos) => {
            list.remove(pos);
            true
          }
          None => false,
        }
      })
      .await;
    if !removed {
      warn!(queue = %kind, "confirmed entry no longer queued");
    }
    removed
  }

  /// Point queued invoices at a customer's server-assigned name. Returns the
  /// number of invoices rewritten.
  pub async fn rewrite_invoice_customer(&self, old: &str, new: &str) -> usize {
    let references =
      |entry: &Value| entry.pointer("/invoice/customer").and_then(Value::as_str) == Some(old);
    if !self.raw_entries(QueueKind::Invoices).iter().any(references) {
      return 0;
    }

    self
      .registry
      .update_state(Slot::OfflineInvoices, |queue| {
        let mut rewritten = 0;
        for entry in list_mut(queue).iter_mut() {
          if !references(&*entry) {
            continue;
          }
          let Some(invoice) = entry.get_mut("invoice").and_then(Value::as_object_mut) else {
            continue;
          };
          invoice.insert("customer".into(), Value::String(new.to_string()));
          if invoice.get("customer_name").is_some_and(|name| !name.is_null()) {
            invoice.insert("customer_name".into(), Value::String(new.to_string()));
          }
          rewritten += 1;
        }
        rewritten
      })
      .await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::fixture;
  use serde_json::json;

  fn invoice(customer: &str, seq: usize) -> OfflineInvoice {
    serde_json::from_value(json!({
      "invoice": {
        "customer": customer,
        "customer_name": customer,
        "items": [{"item_code": "A", "qty": 2, "rate": 10}],
        "seq": seq
      },
      "data": {}
    }))
    .unwrap()
  }

  #[tokio::test]
  async fn test_save_and_delete_by_index() {
    let fx = fixture().await;
    let queues = OfflineQueues::with_max_items(fx.registry.clone(), 10);

    queues.save(&invoice("C1", 0)).await.unwrap();
    queues.save(&invoice("C1", 1)).await.unwrap();
    assert_eq!(queues.pending(QueueKind::Invoices), 2);

    assert!(!queues.delete_by_index(QueueKind::Invoices, 5).await);
    assert!(queues.delete_by_index(QueueKind::Invoices, 0).await);

    let left: Vec<OfflineInvoice> = queues.entries();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].invoice.extra["seq"], json!(1));
  }

  #[tokio::test]
  async fn test_invalid_entry_is_not_stored() {
    let fx = fixture().await;
    let queues = OfflineQueues::with_max_items(fx.registry.clone(), 10);
    let writes = fx.durable.write_count();

    let empty = OfflineInvoice::default();
    assert!(matches!(
      queues.save(&empty).await,
      Err(OfflineError::Validation(_))
    ));
    assert_eq!(queues.pending(QueueKind::Invoices), 0);
    assert_eq!(fx.durable.write_count(), writes);
  }

  #[tokio::test]
  async fn test_cap_drops_oldest_on_save() {
    let fx = fixture().await;
    let queues = OfflineQueues::with_max_items(fx.registry.clone(), 3);

    for seq in 0..5 {
      queues.save(&invoice("C1", seq)).await.unwrap();
    }

    let seqs: Vec<Value> = queues
      .entries::<OfflineInvoice>()
      .into_iter()
      .map(|e| e.invoice.extra["seq"].clone())
      .collect();
    assert_eq!(seqs, vec![json!(2), json!(3), json!(4)]);
  }

  #[tokio::test]
  async fn test_rewrite_invoice_customer() {
    let fx = fixture().await;
    let queues = OfflineQueues::with_max_items(fx.registry.clone(), 10);
    queues.save(&invoice("T1", 0)).await.unwrap();
    queues.save(&invoice("Other", 1)).await.unwrap();

    assert_eq!(queues.rewrite_invoice_customer("T1", "C100").await, 1);
    assert_eq!(queues.rewrite_invoice_customer("T1", "C100").await, 0);

    let entries: Vec<OfflineInvoice> = queues.entries();
    assert_eq!(entries[0].invoice.customer.as_deref(), Some("C100"));
    assert_eq!(entries[0].invoice.customer_name.as_deref(), Some("C100"));
    assert_eq!(entries[1].invoice.customer.as_deref(), Some("Other"));
  }

  #[tokio::test]
  async fn test_remove_confirmed_keeps_later_entries() {
    let fx = fixture().await;
    let queues = OfflineQueues::with_max_items(fx.registry.clone(), 10);
    queues.save(&invoice("C1", 0)).await.unwrap();
    let first = queues.raw_entries(QueueKind::Invoices)[0].clone();
    queues.save(&invoice("C1", 1)).await.unwrap();

    assert!(queues.remove_confirmed(QueueKind::Invoices, &first).await);
    assert!(!queues.remove_confirmed(QueueKind::Invoices, &first).await);
    assert_eq!(queues.pending(QueueKind::Invoices), 1);
  }

  #[test]
  fn test_kind_parses_case_insensitively() {
    assert_eq!("Payments".parse::<QueueKind>().unwrap(), QueueKind::Payments);
    assert!("refunds".parse::<QueueKind>().is_err());
  }
}
