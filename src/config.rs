use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use posync::cache::EvictionConfig;
use posync::connectivity::{secs, ConnectivityConfig};
use posync::queue::{DEFAULT_MAX_QUEUE_ITEMS, MAX_QUEUE_ITEMS_ENV};
use posync::remote::DEFAULT_REMOTE_TIMEOUT;
use posync::sync::FailurePolicy;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Where the database, fallback files and logs live (defaults to the
  /// platform data directory)
  pub data_dir: Option<PathBuf>,
  /// Backend to sync against. Without it the engine only works offline.
  pub remote: Option<RemoteConfig>,
  pub queue: QueueConfig,
  pub eviction: EvictionSettings,
  pub connectivity: ConnectivityConfig,
  pub sync: SyncConfig,
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
  pub url: String,
  #[serde(default = "default_remote_timeout", with = "secs")]
  pub timeout: Duration,
}

fn default_remote_timeout() -> Duration {
  DEFAULT_REMOTE_TIMEOUT
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
  pub max_items: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EvictionSettings {
  #[serde(with = "secs")]
  pub interval: Duration,
  #[serde(with = "secs")]
  pub offers_ttl: Duration,
  #[serde(with = "secs")]
  pub item_details_ttl: Duration,
  #[serde(with = "secs")]
  pub customer_balance_ttl: Duration,
}

impl Default for EvictionSettings {
  fn default() -> Self {
    let defaults = EvictionConfig::default();
    Self {
      interval: defaults.interval,
      offers_ttl: defaults.offers_ttl,
      item_details_ttl: defaults.item_details_ttl,
      customer_balance_ttl: defaults.customer_balance_ttl,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  pub failure_policy: FailurePolicy,
  /// Offload durable writes to a background task
  pub background_writes: bool,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      failure_policy: FailurePolicy::default(),
      background_writes: true,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Filter used when RUST_LOG is unset
  pub level: String,
  /// Log directory (defaults to `<data_dir>/logs`)
  pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      directory: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./posync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/posync/config.yaml
  ///
  /// Without any file every setting takes its default.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("posync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("posync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    // An empty file deserializes to null
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents)
  }

  pub fn data_dir(&self) -> PathBuf {
    self
      .data_dir
      .clone()
      .or_else(|| dirs::data_dir().map(|d| d.join("posync")))
      .unwrap_or_else(|| PathBuf::from(".posync"))
  }

  pub fn log_dir(&self) -> PathBuf {
    self
      .logging
      .directory
      .clone()
      .unwrap_or_else(|| self.data_dir().join("logs"))
  }

  /// Queue cap: POSYNC_MAX_QUEUE_ITEMS, then the config file, then 1000.
  /// Zero or unparsable values are ignored.
  pub fn max_queue_items(&self) -> usize {
    let from_env = std::env::var(MAX_QUEUE_ITEMS_ENV)
      .ok()
      .and_then(|raw| raw.trim().parse::<usize>().ok());
    from_env
      .into_iter()
      .chain(self.queue.max_items)
      .find(|n| *n > 0)
      .unwrap_or(DEFAULT_MAX_QUEUE_ITEMS)
  }

  pub fn eviction_config(&self) -> EvictionConfig {
    EvictionConfig {
      interval: self.eviction.interval,
      offers_ttl: self.eviction.offers_ttl,
      item_details_ttl: self.eviction.item_details_ttl,
      customer_balance_ttl: self.eviction.customer_balance_ttl,
      max_queue_items: self.max_queue_items(),
    }
  }

  /// API key and secret from POSYNC_API_KEY and POSYNC_API_SECRET.
  ///
  /// Either both are set or requests go out unauthenticated.
  pub fn api_credentials() -> Option<(String, String)> {
    let key = std::env::var("POSYNC_API_KEY").ok()?;
    let secret = std::env::var("POSYNC_API_SECRET").ok()?;
    Some((key, secret))
  }
}
