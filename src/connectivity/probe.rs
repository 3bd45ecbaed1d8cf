//! Reachability checks against the backend and the wider internet.

use async_trait::async_trait;
use futures::future::{select_ok, BoxFuture, FutureExt};
use std::time::Duration;
use tracing::trace;
use url::Url;

use super::oracle::ConnectivityConfig;
use crate::error::{OfflineError, Result};

/// Result of one probe round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutcome {
  /// Any of the backend checks answered.
  pub server_reachable: bool,
  pub internet_reachable: bool,
}

impl ProbeOutcome {
  pub fn reachable() -> Self {
    Self {
      server_reachable: true,
      internet_reachable: true,
    }
  }

  pub fn unreachable() -> Self {
    Self {
      server_reachable: false,
      internet_reachable: false,
    }
  }
}

#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
  /// Run one bounded probe round. Timeouts count as unreachable.
  async fn probe(&self) -> ProbeOutcome;
}

/// Probes the app shell, a static asset and the origin in parallel (any
/// answer below 500 counts), alongside an independent external check.
pub struct HttpProbe {
  client: reqwest::Client,
  local_targets: Vec<Url>,
  external: Url,
  local_timeout: Duration,
  external_timeout: Duration,
}

impl HttpProbe {
  pub fn new(base_url: &str, config: &ConnectivityConfig) -> Result<Self> {
    let invalid = |e: url::ParseError| OfflineError::Validation(format!("invalid probe url: {e}"));
    let origin = Url::parse(base_url).map_err(invalid)?;
    let local_targets = vec![
      origin.join("/app").map_err(invalid)?,
      origin
        .join("/assets/frappe/images/frappe-logo.png")
        .map_err(invalid)?,
      origin.join("/").map_err(invalid)?,
    ];
    let external = Url::parse(&config.external_probe_url).map_err(invalid)?;

    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| OfflineError::Connectivity(e.to_string()))?;

    Ok(Self {
      client,
      local_targets,
      external,
      local_timeout: config.probe_timeout,
      external_timeout: config.external_probe_timeout,
    })
  }

  pub fn local_targets(&self) -> &[Url] {
    &self.local_targets
  }

  async fn head(&self, url: Url) -> Result<()> {
    let response = self
      .client
      .head(url.clone())
      .header(reqwest::header::CACHE_CONTROL, "no-cache")
      .timeout(self.local_timeout)
      .send()
      .await
      .map_err(|e| OfflineError::Connectivity(e.to_string()))?;

    if response.status().is_server_error() {
      return Err(OfflineError::Connectivity(format!(
        "{url} answered {}",
        response.status()
      )));
    }
    Ok(())
  }

  async fn local_reachable(&self) -> bool {
    let checks: Vec<BoxFuture<'_, Result<()>>> = self
      .local_targets
      .iter()
      .map(|url| self.head(url.clone()).boxed())
      .collect();

    match select_ok(checks).await {
      Ok(_) => true,
      Err(e) => {
        trace!(error = %e, "every local probe failed");
        false
      }
    }
  }

  async fn internet_reachable(&self) -> bool {
    self
      .client
      .get(self.external.clone())
      .timeout(self.external_timeout)
      .send()
      .await
      .is_ok()
  }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
  async fn probe(&self) -> ProbeOutcome {
    let (server_reachable, internet_reachable) =
      futures::join!(self.local_reachable(), self.internet_reachable());
    ProbeOutcome {
      server_reachable,
      internet_reachable,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_local_targets_hang_off_the_origin() {
    let probe = HttpProbe::new("https://pos.example.com/app/pos", &ConnectivityConfig::default()).unwrap();
    let targets: Vec<&str> = probe.local_targets().iter().map(Url::as_str).collect();
    assert_eq!(
      targets,
      vec![
        "https://pos.example.com/app",
        "https://pos.example.com/assets/frappe/images/frappe-logo.png",
        "https://pos.example.com/",
      ]
    );
  }

  #[tokio::test]
  async fn test_unroutable_server_is_unreachable() {
    let config = ConnectivityConfig {
      probe_timeout: Duration::from_millis(200),
      external_probe_timeout: Duration::from_millis(200),
      external_probe_url: "http://127.0.0.1:9/".into(),
      ..Default::default()
    };
    let probe = HttpProbe::new("http://127.0.0.1:9", &config).unwrap();

    assert_eq!(probe.probe().await, ProbeOutcome::unreachable());
  }
}
