//! Offline-first local data and sync engine for point-of-sale clients.
//!
//! Reference data and queued mutations live in a versioned cache backed by a
//! durable store with a synchronous fallback. Queued invoices, payments and
//! customers are replayed against the remote backend once connectivity
//! returns.

pub mod cache;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod periodic;
pub mod persist;
pub mod queue;
pub mod remote;
pub mod store;
pub mod sync;

pub use engine::{Daemon, Engine, EngineBuilder};
pub use error::{OfflineError, RemoteError, Result};
pub use queue::{OfflineCustomer, OfflineInvoice, OfflinePayment, QueueKind};
pub use sync::{FailurePolicy, SyncTotals};
