use serde::{Deserialize, Serialize};

use crate::error::RemoteError;

/// What to do with an invoice whose submission failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
  /// Try saving every failed submission as a draft.
  #[default]
  DraftAll,
  /// Leave permission failures (401/403) queued, draft everything else.
  KeepPermissionDenied,
  /// Never draft; failed submissions stay queued.
  KeepRejected,
}

impl FailurePolicy {
  pub fn should_draft(&self, err: &RemoteError) -> bool {
    match self {
      FailurePolicy::DraftAll => true,
      FailurePolicy::KeepPermissionDenied => !err.is_permission_denied(),
      FailurePolicy::KeepRejected => false,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_permission_failures_are_classified() {
    let denied = RemoteError::Status {
      status: 403,
      body: "not permitted".into(),
    };
    let conflict = RemoteError::Status {
      status: 417,
      body: "stock".into(),
    };

    assert!(FailurePolicy::DraftAll.should_draft(&denied));
    assert!(!FailurePolicy::KeepPermissionDenied.should_draft(&denied));
    assert!(FailurePolicy::KeepPermissionDenied.should_draft(&conflict));
    assert!(FailurePolicy::KeepPermissionDenied.should_draft(&RemoteError::Timeout));
    assert!(!FailurePolicy::KeepRejected.should_draft(&conflict));
  }
}
