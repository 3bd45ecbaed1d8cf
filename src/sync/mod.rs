//! Replays queued mutations against the remote.
//!
//! Customers always sync before invoices and payments: an invoice may name a
//! customer that only exists locally, and the customer pass rewrites those
//! temporary names to the server-assigned ones before anything referencing
//! them is submitted.

mod policy;

pub use policy::FailurePolicy;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::cache::CacheRegistry;
use crate::connectivity::ConnectivityOracle;
use crate::queue::{OfflineQueues, QueueKind};
use crate::remote::RemoteService;

/// Outcome of one sync pass. `drafted` is only ever non-zero for invoices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTotals {
  pub pending: usize,
  pub synced: usize,
  #[serde(default)]
  pub drafted: usize,
}

impl SyncTotals {
  pub fn pending(pending: usize) -> Self {
    Self {
      pending,
      ..Default::default()
    }
  }
}

/// Releases the invoice sync flag when dropped, whatever path the pass took.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::SeqCst);
  }
}

pub struct SyncOrchestrator {
  queues: OfflineQueues,
  registry: Arc<CacheRegistry>,
  remote: Arc<dyn RemoteService>,
  connectivity: Arc<ConnectivityOracle>,
  policy: FailurePolicy,
  invoice_sync_running: AtomicBool,
}

impl SyncOrchestrator {
  pub fn new(
    queues: OfflineQueues,
    registry: Arc<CacheRegistry>,
    remote: Arc<dyn RemoteService>,
    connectivity: Arc<ConnectivityOracle>,
  ) -> Self {
    Self {
      queues,
      registry,
      remote,
      connectivity,
      policy: FailurePolicy::default(),
      invoice_sync_running: AtomicBool::new(false),
    }
  }

  pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
    self.policy = policy;
    self
  }

  pub fn is_syncing_invoices(&self) -> bool {
    self.invoice_sync_running.load(Ordering::SeqCst)
  }

  /// Submit every queued invoice, saving failures as drafts.
  ///
  /// A call made while another invoice pass is running returns the pending
  /// count without touching the remote.
  pub async fn sync_invoices(&self) -> SyncTotals {
    if self.invoice_sync_running.swap(true, Ordering::SeqCst) {
      debug!("invoice sync already running");
      return SyncTotals::pending(self.queues.pending(QueueKind::Invoices));
    }
    let _running = RunningGuard(&self.invoice_sync_running);

    if self.connectivity.is_offline() {
      return SyncTotals::pending(self.queues.pending(QueueKind::Invoices));
    }

    self.sync_customers().await;

    let invoices = self.queues.raw_entries(QueueKind::Invoices);
    if invoices.is_empty() {
      let totals = SyncTotals::default();
      self.registry.set_last_sync_totals(totals).await;
      return totals;
    }

    let mut totals = SyncTotals::default();
    for entry in &invoices {
      let invoice = entry.get("invoice").unwrap_or(&Value::Null);
      let data = entry.get("data").unwrap_or(&Value::Null);

      let submit_err = match self.remote.submit_invoice(invoice, data).await {
        Ok(_) => {
          self.queues.remove_confirmed(QueueKind::Invoices, entry).await;
          totals.synced += 1;
          continue;
        }
        Err(e) => e,
      };

      if !self.policy.should_draft(&submit_err) {
        warn!(error = %submit_err, "invoice submission failed, keeping it queued");
        continue;
      }
      warn!(error = %submit_err, "invoice submission failed, saving as draft");
      match self.remote.update_invoice(invoice).await {
        Ok(_) => {
          self.queues.remove_confirmed(QueueKind::Invoices, entry).await;
          totals.drafted += 1;
        }
        Err(e) => error!(error = %e, "failed to save invoice as draft"),
      }
    }

    totals.pending = self.queues.pending(QueueKind::Invoices);
    self.registry.set_last_sync_totals(totals).await;

    if totals.pending == 0 && totals.synced > 0 && totals.drafted == 0 {
      self.registry.reduce_cache_usage().await;
    }
    info!(
      synced = totals.synced,
      drafted = totals.drafted,
      pending = totals.pending,
      "invoice sync finished"
    );
    totals
  }

  /// Create queued customers, repairing invoice references to any customer
  /// whose server name differs from its temporary one.
  pub async fn sync_customers(&self) -> SyncTotals {
    let customers = self.queues.raw_entries(QueueKind::Customers);
    if customers.is_empty() {
      return SyncTotals::default();
    }
    if self.connectivity.is_offline() {
      return SyncTotals::pending(customers.len());
    }

    let mut totals = SyncTotals::default();
    for entry in &customers {
      let args = entry.get("args").unwrap_or(&Value::Null);
      match self.remote.create_customer(args).await {
        Ok(created) => {
          self.queues.remove_confirmed(QueueKind::Customers, entry).await;
          totals.synced += 1;

          let temp = args.get("customer_name").and_then(Value::as_str).unwrap_or_default();
          if !temp.is_empty() && created.name != temp {
            let rewritten = self.queues.rewrite_invoice_customer(temp, &created.name).await;
            info!(from = %temp, to = %created.name, rewritten, "customer renamed by server");
          }
        }
        Err(e) => warn!(error = %e, "failed to create customer, keeping it queued"),
      }
    }

    totals.pending = self.queues.pending(QueueKind::Customers);
    debug!(synced = totals.synced, pending = totals.pending, "customer sync finished");
    totals
  }

  /// Submit queued payments. Failures stay queued; there is no draft step.
  pub async fn sync_payments(&self) -> SyncTotals {
    if self.connectivity.is_offline() {
      return SyncTotals::pending(self.queues.pending(QueueKind::Payments));
    }

    self.sync_customers().await;

    let payments = self.queues.raw_entries(QueueKind::Payments);
    if payments.is_empty() {
      return SyncTotals::default();
    }

    let mut totals = SyncTotals::default();
    for entry in &payments {
      let args = entry.get("args").unwrap_or(&Value::Null);
      match self.remote.process_pos_payment(args).await {
        Ok(_) => {
          self.queues.remove_confirmed(QueueKind::Payments, entry).await;
          totals.synced += 1;
        }
        Err(e) => warn!(error = %e, "failed to submit payment, keeping it queued"),
      }
    }

    totals.pending = self.queues.pending(QueueKind::Payments);
    info!(synced = totals.synced, pending = totals.pending, "payment sync finished");
    totals
  }
}
