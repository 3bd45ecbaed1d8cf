//! Debounced online/offline decision.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tracing::{debug, info};

use super::probe::{ProbeOutcome, ReachabilityProbe};
use crate::cache::CacheRegistry;
use crate::periodic::PeriodicHandle;

pub const EXTERNAL_PROBE_URL: &str = "https://www.google.com/generate_204";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
  /// Consecutive failed probes before the server counts as offline.
  pub failure_threshold: u32,
  /// Consecutive good probes before the server counts as online again.
  pub success_threshold: u32,
  #[serde(with = "secs")]
  pub min_interval: Duration,
  #[serde(with = "secs")]
  pub max_interval: Duration,
  #[serde(with = "secs")]
  pub probe_timeout: Duration,
  #[serde(with = "secs")]
  pub external_probe_timeout: Duration,
  pub external_probe_url: String,
}

impl Default for ConnectivityConfig {
  fn default() -> Self {
    Self {
      failure_threshold: 2,
      success_threshold: 1,
      min_interval: Duration::from_secs(15),
      max_interval: Duration::from_secs(120),
      probe_timeout: Duration::from_secs(8),
      external_probe_timeout: Duration::from_secs(5),
      external_probe_url: EXTERNAL_PROBE_URL.to_string(),
    }
  }
}

/// Durations written as whole seconds in config files.
pub mod secs {
  use serde::{Deserialize, Deserializer, Serializer};
  use std::time::Duration;

  pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs())
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    u64::deserialize(d).map(Duration::from_secs)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectivityState {
  pub network_online: bool,
  pub server_online: bool,
  pub internet_reachable: bool,
  /// A probe round is in flight.
  pub server_connecting: bool,
  pub manual_offline: bool,
}

impl ConnectivityState {
  pub fn offline(&self) -> bool {
    self.manual_offline || !(self.network_online && self.server_online)
  }
}

struct Counters {
  failures: u32,
  successes: u32,
  interval: Duration,
}

/// Decides whether the engine is offline from the manual toggle, the network
/// signal and debounced server probes.
pub struct ConnectivityOracle {
  registry: Arc<CacheRegistry>,
  config: ConnectivityConfig,
  counters: Mutex<Counters>,
  state: watch::Sender<ConnectivityState>,
  wake: Notify,
}

impl ConnectivityOracle {
  /// Start optimistic: online until probes say otherwise.
  pub fn new(registry: Arc<CacheRegistry>, config: ConnectivityConfig) -> Self {
    let manual_offline = registry.manual_offline();
    let (state, _) = watch::channel(ConnectivityState {
      network_online: true,
      server_online: true,
      internet_reachable: true,
      server_connecting: false,
      manual_offline,
    });
    Self {
      counters: Mutex::new(Counters {
        failures: 0,
        successes: 0,
        interval: config.min_interval,
      }),
      registry,
      config,
      state,
      wake: Notify::new(),
    }
  }

  fn counters(&self) -> MutexGuard<'_, Counters> {
    self.counters.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn config(&self) -> &ConnectivityConfig {
    &self.config
  }

  /// Current state, with the manual flag read fresh from the registry.
  pub fn state(&self) -> ConnectivityState {
    ConnectivityState {
      manual_offline: self.registry.manual_offline(),
      ..*self.state.borrow()
    }
  }

  pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
    self.state.subscribe()
  }

  /// Manual offline always wins; otherwise both the network and the server
  /// must be up.
  pub fn is_offline(&self) -> bool {
    self.state().offline()
  }

  /// Delay before the next probe round.
  pub fn current_interval(&self) -> Duration {
    self.counters().interval
  }

  fn publish(&self, f: impl FnOnce(&mut ConnectivityState)) {
    let manual_offline = self.registry.manual_offline();
    self.state.send_if_modified(|state| {
      let before = *state;
      f(state);
      state.manual_offline = manual_offline;
      *state != before
    });
  }

  /// Re-read the manual flag after it was changed.
  pub fn refresh_manual_offline(&self) {
    self.publish(|_| {});
    self.wake.notify_one();
  }

  /// OS-level network signal. Losing the network takes the server down with
  /// it immediately; regaining it triggers an early probe.
  pub fn set_network_online(&self, online: bool) {
    if self.registry.manual_offline() {
      return;
    }
    if !online {
      let mut counters = self.counters();
      counters.successes = 0;
      counters.failures = 0;
    }
    self.publish(|state| {
      state.network_online = online;
      state.internet_reachable = online;
      if !online {
        state.server_online = false;
      }
    });
    if online {
      self.wake.notify_one();
    }
    info!(online, "network signal changed");
  }

  /// Feed one probe result through the hysteresis. Returns the delay before
  /// the next probe: doubled (up to the cap) after a failure, reset to the
  /// minimum after a success.
  pub fn record_probe(&self, outcome: ProbeOutcome) -> Duration {
    let current = *self.state.borrow();
    let (flip, interval) = {
      let mut counters = self.counters();
      let flip = if outcome.server_reachable {
        counters.failures = 0;
        counters.interval = self.config.min_interval;
        if current.server_online && current.network_online {
          // Successes only count towards reconnecting.
          counters.successes = 0;
          false
        } else {
          counters.successes += 1;
          counters.successes >= self.config.success_threshold
        }
      } else {
        counters.successes = 0;
        counters.failures += 1;
        counters.interval = (counters.interval * 2).min(self.config.max_interval);
        current.server_online && counters.failures >= self.config.failure_threshold
      };
      (flip, counters.interval)
    };

    self.publish(|state| {
      state.server_connecting = false;
      state.internet_reachable = outcome.internet_reachable;
      if flip {
        state.server_online = outcome.server_reachable;
        if outcome.server_reachable {
          state.network_online = true;
        }
      }
    });

    if flip {
      info!(server_online = outcome.server_reachable, "server connectivity changed");
    }
    debug!(?outcome, next_probe = ?interval, "probe recorded");
    interval
  }

  /// Probe on a backoff schedule until stopped. Each round finishes before
  /// the next is scheduled.
  pub fn spawn_probe_loop(self: Arc<Self>, probe: Arc<dyn ReachabilityProbe>) -> PeriodicHandle {
    PeriodicHandle::spawn(move |mut stop| async move {
      loop {
        let delay = if self.registry.manual_offline() {
          self.publish(|state| {
            state.network_online = false;
            state.server_online = false;
            state.internet_reachable = false;
            state.server_connecting = false;
          });
          self.config.min_interval
        } else {
          self.publish(|state| state.server_connecting = true);
          let outcome = probe.probe().await;
          self.record_probe(outcome)
        };

        tokio::select! {
          keep_going = stop.sleep(delay) => {
            if !keep_going {
              break;
            }
          }
          _ = self.wake.notified() => {}
        }
        if stop.is_stopped() {
          break;
        }
      }
      debug!("connectivity probing stopped");
    })
  }
}
