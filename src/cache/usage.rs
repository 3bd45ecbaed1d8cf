//! Rough storage footprint of the cache.

use serde::Serialize;
use tracing::{error, warn};

use super::registry::CacheRegistry;

/// Storage budget the usage percentage is computed against.
pub const MAX_CACHE_BYTES: u64 = 50 * 1024 * 1024;

/// Usage ratio above which [`CacheRegistry::check_storage_usage`] warns.
pub const USAGE_WARN_THRESHOLD: f64 = 0.9;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheUsage {
  pub total: u64,
  pub local_fallback: u64,
  pub durable_store: u64,
  /// Whole percent of [`MAX_CACHE_BYTES`], capped at 100.
  pub percentage: u8,
}

impl CacheUsage {
  fn new(local_fallback: u64, durable_store: u64) -> Self {
    let total = local_fallback + durable_store;
    let percentage = ((total as f64 / MAX_CACHE_BYTES as f64) * 100.0).round().min(100.0) as u8;
    Self {
      total,
      local_fallback,
      durable_store,
      percentage,
    }
  }
}

impl CacheRegistry {
  /// Estimate bytes held by the fallback store and the durable store.
  ///
  /// A durable store that cannot be read counts as empty.
  pub async fn usage_estimate(&self) -> CacheUsage {
    let fallback: u64 = self
      .persister()
      .fallback()
      .entries()
      .iter()
      .map(|(key, raw)| (key.len() + raw.len()) as u64)
      .sum();

    let durable = self.persister().durable();
    let durable_bytes = match durable.check_health().await {
      Ok(()) => match durable.entries().await {
        Ok(records) => records.iter().map(|r| r.size_bytes() as u64).sum(),
        Err(e) => {
          error!(error = %e, "failed to size durable store");
          0
        }
      },
      Err(e) => {
        error!(error = %e, "durable store unavailable for sizing");
        0
      }
    };

    CacheUsage::new(fallback, durable_bytes)
  }

  /// Log a warning when usage crosses `threshold` (a ratio in `0..=1`).
  /// Returns whether it did.
  pub async fn check_storage_usage(&self, threshold: f64) -> bool {
    let usage = self.usage_estimate().await;
    let over = usage.total as f64 >= MAX_CACHE_BYTES as f64 * threshold;
    if over {
      warn!(
        total = usage.total,
        percentage = usage.percentage,
        "offline cache is close to its storage budget"
      );
    }
    over
  }
}
