//! Background persistence worker.
//!
//! The worker owns nothing but a handle to the durable store. Callers hand it
//! `persist` messages over a channel and never wait for the write; every
//! completed write is announced on a broadcast channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::store::DurableStore;

/// Requests accepted by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerMessage {
  Persist { key: String, value: Value },
}

/// Notifications emitted by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerEvent {
  Persisted { key: String },
  Failed { key: String, error: String },
}

pub struct PersistWorker {
  tx: mpsc::UnboundedSender<WorkerMessage>,
  events: broadcast::Sender<WorkerEvent>,
  handle: JoinHandle<()>,
}

impl PersistWorker {
  /// Spawn the worker task. Must be called from within a tokio runtime.
  pub fn spawn(durable: Arc<dyn DurableStore>) -> Self {
    let (tx, mut rx) = mpsc::unbounded_channel::<WorkerMessage>();
    let (events, _) = broadcast::channel(64);
    let events_tx = events.clone();

    let handle = tokio::spawn(async move {
      while let Some(message) = rx.recv().await {
        match message {
          WorkerMessage::Persist { key, value } => {
            let event = match durable.put(&key, &value).await {
              Ok(()) => {
                debug!(key = %key, "worker persisted");
                WorkerEvent::Persisted { key }
              }
              Err(e) => {
                error!(key = %key, error = %e, "worker failed to persist");
                WorkerEvent::Failed {
                  key,
                  error: e.to_string(),
                }
              }
            };
            // Nobody listening is fine
            let _ = events_tx.send(event);
          }
        }
      }
    });

    Self { tx, events, handle }
  }

  /// Forward a message. On failure the message is handed back so the caller
  /// can write it inline instead.
  pub fn send(&self, message: WorkerMessage) -> Result<(), WorkerMessage> {
    self.tx.send(message).map_err(|e| e.0)
  }

  pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
    self.events.subscribe()
  }

  pub fn is_alive(&self) -> bool {
    !self.handle.is_finished()
  }

  /// Stop the worker immediately. Queued messages are discarded.
  pub fn terminate(self) {
    self.handle.abort();
  }

  /// Close the channel and wait until every queued message is written.
  pub async fn shutdown(self) {
    let Self { tx, handle, .. } = self;
    drop(tx);
    if let Err(e) = handle.await {
      error!(error = %e, "persist worker ended abnormally");
    }
  }
}
