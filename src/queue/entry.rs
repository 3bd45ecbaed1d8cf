//! Typed payloads of the three offline queues.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::QueueKind;
use crate::error::{OfflineError, Result};

/// Profile fields the payment endpoint reads. Everything else is dropped
/// before a payment is queued.
pub const PAYMENT_PROFILE_FIELDS: [&str; 7] = [
  "posa_use_pos_awesome_payments",
  "posa_allow_make_new_payments",
  "posa_allow_reconcile_payments",
  "posa_allow_mpesa_reconcile_payments",
  "cost_center",
  "posa_cash_mode_of_payment",
  "name",
];

/// A mutation that can wait in an offline queue.
pub trait QueueEntry: Serialize + DeserializeOwned + Clone + Send + Sync {
  const KIND: QueueKind;

  /// Reject entries the remote would never accept.
  fn validate(&self) -> Result<()> {
    Ok(())
  }

  /// Shrink the entry to what replay needs.
  fn reduce(&mut self) {}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoiceDoc {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub customer: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub customer_name: Option<String>,
  #[serde(default)]
  pub items: Vec<Value>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OfflineInvoice {
  pub invoice: InvoiceDoc,
  #[serde(default)]
  pub data: Value,
}

impl QueueEntry for OfflineInvoice {
  const KIND: QueueKind = QueueKind::Invoices;

  fn validate(&self) -> Result<()> {
    if self.invoice.items.is_empty() {
      return Err(OfflineError::Validation(
        "Cart is empty. Add items before saving.".into(),
      ));
    }
    Ok(())
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OfflinePayment {
  #[serde(default)]
  pub args: Value,
}

impl QueueEntry for OfflinePayment {
  const KIND: QueueKind = QueueKind::Payments;

  fn reduce(&mut self) {
    let Some(profile) = self.args.pointer_mut("/payload/pos_profile") else {
      return;
    };
    let Some(full) = profile.as_object() else {
      return;
    };
    let trimmed: Map<String, Value> = PAYMENT_PROFILE_FIELDS
      .iter()
      .filter_map(|field| full.get(*field).map(|v| (field.to_string(), v.clone())))
      .collect();
    *profile = Value::Object(trimmed);
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerArgs {
  #[serde(default)]
  pub customer_name: String,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OfflineCustomer {
  pub args: CustomerArgs,
}

impl QueueEntry for OfflineCustomer {
  const KIND: QueueKind = QueueKind::Customers;

  fn validate(&self) -> Result<()> {
    if self.args.customer_name.trim().is_empty() {
      return Err(OfflineError::Validation("Customer name is required.".into()));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_invoice_without_items_is_rejected() {
    let invoice: OfflineInvoice =
      serde_json::from_value(json!({"invoice": {"customer": "C1"}, "data": {}})).unwrap();
    assert!(matches!(invoice.validate(), Err(OfflineError::Validation(_))));
  }

  #[test]
  fn test_invoice_keeps_unknown_fields() {
    let raw = json!({
      "invoice": {"customer": "C1", "items": [{"item_code": "A"}], "posting_date": "2024-01-01"},
      "data": {"total": 10}
    });
    let invoice: OfflineInvoice = serde_json::from_value(raw.clone()).unwrap();

    assert!(invoice.validate().is_ok());
    assert_eq!(serde_json::to_value(&invoice).unwrap(), raw);
  }

  #[test]
  fn test_payment_profile_is_trimmed() {
    let mut payment: OfflinePayment = serde_json::from_value(json!({
      "args": {
        "payload": {
          "amount": 10,
          "pos_profile": {
            "name": "Main",
            "cost_center": "CC",
            "payments": [{"mode": "Cash"}],
            "company": "ACME"
          }
        }
      }
    }))
    .unwrap();

    payment.reduce();

    assert_eq!(
      payment.args["payload"]["pos_profile"],
      json!({"name": "Main", "cost_center": "CC"})
    );
    assert_eq!(payment.args["payload"]["amount"], json!(10));
  }

  #[test]
  fn test_customer_requires_a_name() {
    let customer = OfflineCustomer {
      args: CustomerArgs {
        customer_name: "  ".into(),
        ..Default::default()
      },
    };
    assert!(customer.validate().is_err());
  }
}
