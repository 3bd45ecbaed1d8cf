//! Versioned in-memory cache over the persistence layer.
//!
//! The [`CacheRegistry`] owns every named slot. Eviction and the usage
//! estimate operate on a shared registry.

mod eviction;
mod helpers;
mod registry;
mod slot;
mod usage;

pub use eviction::{EvictionConfig, EvictionManager, SweepReport};
pub use helpers::{CustomerContact, COUPON_TTL, CUSTOMER_BALANCE_TTL, TRANSLATION_TTL};
pub use registry::CacheRegistry;
pub use slot::{Slot, CACHE_VERSION};
pub use usage::{CacheUsage, MAX_CACHE_BYTES, USAGE_WARN_THRESHOLD};

#[cfg(test)]
pub(crate) use registry::tests::{fixture, Fixture};

/// Current wall-clock time in milliseconds, the unit of every slot timestamp.
pub fn now_millis() -> i64 {
  chrono::Utc::now().timestamp_millis()
}
