//! Durable and fallback key-value storage.
//!
//! - [`DurableStore`]: asynchronous single-table database (SQLite in
//!   production, a map in tests)
//! - [`FallbackStore`]: synchronous namespaced mirror of the same keys

mod fallback;
mod memory;
mod sqlite;
mod traits;

pub use fallback::FileFallback;
pub use memory::{MemoryFallback, MemoryStore};
pub use sqlite::SqliteStore;
pub use traits::{DurableStore, FallbackStore, StoredRecord, FALLBACK_PREFIX};
