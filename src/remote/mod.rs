//! The backend RPC surface the sync engine replays mutations against.

mod cached;
mod http;
#[cfg(test)]
pub(crate) mod mock;

pub use cached::CachedLookups;
pub use http::{HttpRemote, DEFAULT_REMOTE_TIMEOUT};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RemoteError, Result};

pub const SUBMIT_INVOICE: &str = "posawesome.posawesome.api.invoices.submit_invoice";
pub const UPDATE_INVOICE: &str = "posawesome.posawesome.api.invoices.update_invoice";
pub const CREATE_CUSTOMER: &str = "posawesome.posawesome.api.customers.create_customer";
pub const PROCESS_POS_PAYMENT: &str = "posawesome.posawesome.api.payment_entry.process_pos_payment";
pub const GET_PRICE_LIST_CURRENCY: &str = "posawesome.posawesome.api.invoices.get_price_list_currency";

/// Doctype of the per-profile tax templates.
pub const TAX_TEMPLATE_DOCTYPE: &str = "Sales Taxes and Charges Template";

/// Customer record returned by the backend after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedCustomer {
  pub name: String,
}

/// Remote calls consumed by the sync engine. Any call may fail.
#[async_trait]
pub trait RemoteService: Send + Sync {
  async fn submit_invoice(&self, invoice: &Value, data: &Value) -> Result<Value, RemoteError>;

  /// Save an invoice as a draft, the fallback when submission fails.
  async fn update_invoice(&self, data: &Value) -> Result<Value, RemoteError>;

  async fn create_customer(&self, args: &Value) -> Result<CreatedCustomer, RemoteError>;

  async fn process_pos_payment(&self, args: &Value) -> Result<Value, RemoteError>;

  async fn get_price_list_currency(&self, price_list: &str) -> Result<String, RemoteError>;

  /// Fetch one record by doctype and name.
  async fn get_doc(&self, doctype: &str, name: &str) -> Result<Value, RemoteError>;
}
