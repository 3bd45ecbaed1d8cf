//! Per-key write coalescing.
//!
//! Bursts of writes to the same key inside one window collapse into a single
//! persist of the last value. Nothing is promised about the order in which
//! distinct keys reach the store.
//!
//! A flush holds the writer lock it shares with direct writes, so a timed
//! flush of an older value never lands after a newer direct write.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use super::proxy::Persister;

/// Default coalescing window.
pub const DEFAULT_BATCH_WINDOW: Duration = Duration::from_millis(100);

struct BatchInner {
  persister: Arc<Persister>,
  write_lock: Arc<AsyncMutex<()>>,
  pending: Mutex<HashMap<String, Value>>,
  scheduled: AtomicBool,
  window: Duration,
}

impl BatchInner {
  fn pending(&self) -> MutexGuard<'_, HashMap<String, Value>> {
    self.pending.lock().unwrap_or_else(PoisonError::into_inner)
  }

  async fn flush(&self) {
    // Clear the flag first so a write racing with this flush schedules its own
    self.scheduled.store(false, Ordering::SeqCst);
    let _guard = self.write_lock.lock().await;
    let batch = std::mem::take(&mut *self.pending());
    if batch.is_empty() {
      return;
    }

    debug!(keys = batch.len(), "flushing persist batch");
    for (key, value) in batch {
      self.persister.persist(&key, &value).await;
    }
  }
}

#[derive(Clone)]
pub struct PersistBatcher {
  inner: Arc<BatchInner>,
}

impl PersistBatcher {
  /// `write_lock` is the lock direct writers hold while persisting.
  pub fn new(persister: Arc<Persister>, write_lock: Arc<AsyncMutex<()>>) -> Self {
    Self::with_window(persister, write_lock, DEFAULT_BATCH_WINDOW)
  }

  pub fn with_window(
    persister: Arc<Persister>,
    write_lock: Arc<AsyncMutex<()>>,
    window: Duration,
  ) -> Self {
    Self {
      inner: Arc::new(BatchInner {
        persister,
        write_lock,
        pending: Mutex::new(HashMap::new()),
        scheduled: AtomicBool::new(false),
        window,
      }),
    }
  }

  /// Queue a write. The first write of a window arms the flush timer.
  ///
  /// Must be called from within a tokio runtime.
  pub fn queue(&self, key: &str, value: Value) {
    self.inner.pending().insert(key.to_string(), value);

    if !self.inner.scheduled.swap(true, Ordering::SeqCst) {
      let inner = Arc::clone(&self.inner);
      tokio::spawn(async move {
        tokio::time::sleep(inner.window).await;
        inner.flush().await;
      });
    }
  }

  /// Drop a pending write for `key`, used when a direct write supersedes it.
  pub fn discard(&self, key: &str) {
    self.inner.pending().remove(key);
  }

  pub fn discard_all(&self) {
    self.inner.pending().clear();
  }

  /// Write everything pending now.
  pub async fn flush(&self) {
    self.inner.flush().await;
  }

  pub fn pending_len(&self) -> usize {
    self.inner.pending().len()
  }
}
