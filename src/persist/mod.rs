//! Persistence proxy: structural cloning, dual-store writes, background
//! offload and per-key batching.

mod batch;
mod proxy;
mod worker;

pub use batch::{PersistBatcher, DEFAULT_BATCH_WINDOW};
pub use proxy::{structural_clone, Persister};
pub use worker::{PersistWorker, WorkerEvent, WorkerMessage};
