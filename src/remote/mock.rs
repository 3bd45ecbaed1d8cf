//! Scripted in-process remote for tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::*;

#[derive(Default)]
pub(crate) struct MockRemote {
  fail_all: AtomicBool,
  fail_submit: AtomicBool,
  fail_draft: AtomicBool,
  fail_customers: AtomicBool,
  fail_payments: AtomicBool,
  delay: Mutex<Option<Duration>>,
  renames: Mutex<HashMap<String, String>>,
  docs: Mutex<HashMap<String, Value>>,
  calls: Mutex<Vec<String>>,
  submitted: Mutex<Vec<Value>>,
}

impl MockRemote {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn fail_all(&self, fail: bool) {
    self.fail_all.store(fail, Ordering::SeqCst);
  }

  pub fn fail_submit(&self, fail: bool) {
    self.fail_submit.store(fail, Ordering::SeqCst);
  }

  pub fn fail_draft(&self, fail: bool) {
    self.fail_draft.store(fail, Ordering::SeqCst);
  }

  pub fn fail_customers(&self, fail: bool) {
    self.fail_customers.store(fail, Ordering::SeqCst);
  }

  pub fn fail_payments(&self, fail: bool) {
    self.fail_payments.store(fail, Ordering::SeqCst);
  }

  /// Delay every call, to hold a sync pass open.
  pub fn set_delay(&self, delay: Duration) {
    *self.delay.lock().unwrap() = Some(delay);
  }

  /// Have `create_customer` answer `server` for a customer named `temp`.
  pub fn rename_customer(&self, temp: &str, server: &str) {
    self
      .renames
      .lock()
      .unwrap()
      .insert(temp.to_string(), server.to_string());
  }

  pub fn set_doc(&self, name: &str, doc: Value) {
    self.docs.lock().unwrap().insert(name.to_string(), doc);
  }

  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self, method: &str) -> usize {
    self.calls().iter().filter(|m| m.as_str() == method).count()
  }

  /// Invoices accepted by `submit_invoice`, in order.
  pub fn submitted(&self) -> Vec<Value> {
    self.submitted.lock().unwrap().clone()
  }

  async fn enter(&self, method: &str, flag: &AtomicBool) -> Result<(), RemoteError> {
    self.calls.lock().unwrap().push(method.to_string());
    let delay = *self.delay.lock().unwrap();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }
    if self.fail_all.load(Ordering::SeqCst) || flag.load(Ordering::SeqCst) {
      return Err(RemoteError::Status {
        status: 417,
        body: format!("{method} rejected"),
      });
    }
    Ok(())
  }
}

#[async_trait]
impl RemoteService for MockRemote {
  async fn submit_invoice(&self, invoice: &Value, _data: &Value) -> Result<Value, RemoteError> {
    self.enter(SUBMIT_INVOICE, &self.fail_submit).await?;
    self.submitted.lock().unwrap().push(invoice.clone());
    Ok(invoice.clone())
  }

  async fn update_invoice(&self, data: &Value) -> Result<Value, RemoteError> {
    self.enter(UPDATE_INVOICE, &self.fail_draft).await?;
    Ok(data.clone())
  }

  async fn create_customer(&self, args: &Value) -> Result<CreatedCustomer, RemoteError> {
    self.enter(CREATE_CUSTOMER, &self.fail_customers).await?;
    let temp = args["customer_name"].as_str().unwrap_or_default().to_string();
    let name = self
      .renames
      .lock()
      .unwrap()
      .get(&temp)
      .cloned()
      .unwrap_or(temp);
    Ok(CreatedCustomer { name })
  }

  async fn process_pos_payment(&self, args: &Value) -> Result<Value, RemoteError> {
    self.enter(PROCESS_POS_PAYMENT, &self.fail_payments).await?;
    Ok(args.clone())
  }

  async fn get_price_list_currency(&self, _price_list: &str) -> Result<String, RemoteError> {
    let never = AtomicBool::new(false);
    self.enter(GET_PRICE_LIST_CURRENCY, &never).await?;
    Ok("USD".to_string())
  }

  async fn get_doc(&self, _doctype: &str, name: &str) -> Result<Value, RemoteError> {
    let never = AtomicBool::new(false);
    self.enter("get_doc", &never).await?;
    self
      .docs
      .lock()
      .unwrap()
      .get(name)
      .cloned()
      .ok_or_else(|| RemoteError::Status {
        status: 404,
        body: format!("{name} not found"),
      })
  }
}
