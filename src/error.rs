//! Error taxonomy for the offline engine.

use thiserror::Error;

/// Failures surfaced by the offline subsystem.
///
/// Storage and serialization faults raised while persisting are logged and
/// degraded to the fallback store by the persistence layer; validation faults
/// are returned to whoever tried to enqueue the mutation.
#[derive(Debug, Error)]
pub enum OfflineError {
  /// Durable store unavailable, blocked or failing.
  #[error("storage fault: {0}")]
  Storage(String),

  /// A value could not be turned into a structural (JSON) clone.
  #[error("serialization fault for '{key}': {source}")]
  Serialization {
    key: String,
    #[source]
    source: serde_json::Error,
  },

  /// A mutation was structurally invalid and refused at enqueue time.
  #[error("validation fault: {0}")]
  Validation(String),

  /// The remote service rejected or failed a call.
  #[error("remote fault: {0}")]
  Remote(#[from] RemoteError),

  /// A reachability probe timed out or hit a network error.
  #[error("connectivity fault: {0}")]
  Connectivity(String),
}

impl OfflineError {
  pub fn serialization(key: impl Into<String>, source: serde_json::Error) -> Self {
    Self::Serialization {
      key: key.into(),
      source,
    }
  }
}

impl From<rusqlite::Error> for OfflineError {
  fn from(err: rusqlite::Error) -> Self {
    Self::Storage(err.to_string())
  }
}

/// Failure of a single remote call.
#[derive(Debug, Error)]
pub enum RemoteError {
  #[error("request failed: {0}")]
  Http(String),

  #[error("server returned {status}: {body}")]
  Status { status: u16, body: String },

  #[error("could not decode response: {0}")]
  Decode(String),

  #[error("request timed out")]
  Timeout,
}

impl RemoteError {
  /// Permission failures (401/403) are never going to succeed on retry.
  pub fn is_permission_denied(&self) -> bool {
    matches!(self, Self::Status { status, .. } if *status == 401 || *status == 403)
  }
}

impl From<reqwest::Error> for RemoteError {
  fn from(err: reqwest::Error) -> Self {
    if err.is_timeout() {
      Self::Timeout
    } else if err.is_decode() {
      Self::Decode(err.to_string())
    } else {
      Self::Http(err.to_string())
    }
  }
}

pub type Result<T, E = OfflineError> = std::result::Result<T, E>;
