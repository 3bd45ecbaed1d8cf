//! Handles for self-rescheduling background loops.

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Receiving end of a stop request, held by the loop.
#[derive(Clone)]
pub struct StopSignal {
  rx: watch::Receiver<bool>,
}

impl StopSignal {
  pub fn is_stopped(&self) -> bool {
    *self.rx.borrow()
  }

  /// Resolve once a stop was requested.
  pub async fn stopped(&mut self) {
    let _ = self.rx.wait_for(|stopped| *stopped).await;
  }

  /// Sleep for `delay`, returning early with `false` if a stop was requested.
  ///
  /// Loops only call this between ticks, so a running tick always completes.
  pub async fn sleep(&mut self, delay: Duration) -> bool {
    if self.is_stopped() {
      return false;
    }
    tokio::select! {
      _ = tokio::time::sleep(delay) => !self.is_stopped(),
      _ = self.stopped() => false,
    }
  }
}

/// Owner side of a spawned periodic loop.
pub struct PeriodicHandle {
  stop_tx: watch::Sender<bool>,
  handle: JoinHandle<()>,
}

impl PeriodicHandle {
  /// Spawn `body` with a fresh stop signal.
  pub fn spawn<F, Fut>(body: F) -> Self
  where
    F: FnOnce(StopSignal) -> Fut,
    Fut: std::future::Future<Output = ()> + Send + 'static,
  {
    let (stop_tx, rx) = watch::channel(false);
    let handle = tokio::spawn(body(StopSignal { rx }));
    Self { stop_tx, handle }
  }

  /// Prevent the next scheduled run. A run in progress finishes first.
  pub fn stop(&self) {
    self.stop_tx.send_replace(true);
  }

  pub fn is_finished(&self) -> bool {
    self.handle.is_finished()
  }

  /// Stop and wait for the loop to exit.
  pub async fn shutdown(self) {
    self.stop();
    let _ = self.handle.await;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Arc;

  #[tokio::test]
  async fn test_loop_ticks_until_stopped() {
    let ticks = Arc::new(AtomicU32::new(0));
    let counter = ticks.clone();

    let handle = PeriodicHandle::spawn(move |mut stop| async move {
      while stop.sleep(Duration::from_millis(5)).await {
        counter.fetch_add(1, Ordering::SeqCst);
      }
    });

    tokio::time::sleep(Duration::from_millis(40)).await;
    handle.shutdown().await;

    let seen = ticks.load(Ordering::SeqCst);
    assert!(seen >= 1);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(ticks.load(Ordering::SeqCst), seen);
  }

  #[tokio::test]
  async fn test_stop_interrupts_long_sleep() {
    let handle = PeriodicHandle::spawn(|mut stop| async move {
      while stop.sleep(Duration::from_secs(3600)).await {}
    });

    tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
      .await
      .unwrap();
  }

  #[tokio::test]
  async fn test_sleep_after_stop_returns_false() {
    let (tx, rx) = watch::channel(false);
    let mut stop = StopSignal { rx };

    assert!(stop.sleep(Duration::from_millis(1)).await);
    tx.send_replace(true);
    assert!(!stop.sleep(Duration::from_secs(3600)).await);
    stop.stopped().await;
    assert!(stop.is_stopped());
  }
}
