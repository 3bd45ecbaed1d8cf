mod config;
mod logging;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use config::Config;
use posync::connectivity::HttpProbe;
use posync::remote::HttpRemote;
use posync::{Engine, EngineBuilder, QueueKind, SyncTotals};

#[derive(Parser, Debug)]
#[command(name = "posync")]
#[command(about = "Offline queue and sync engine for point-of-sale clients")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/posync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Log filter when RUST_LOG is unset (overrides the config file)
  #[arg(long)]
  log_level: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show connectivity, queue sizes and cache usage
  Status,
  /// Replay queued mutations against the remote
  Sync {
    #[arg(value_enum, default_value_t = SyncTarget::All)]
    target: SyncTarget,
  },
  /// Inspect or edit an offline queue
  Queue {
    #[command(subcommand)]
    action: QueueAction,
  },
  /// Estimate local storage usage
  Usage,
  /// Clear every cache slot and queue
  Clear {
    /// Wipe without checking store health first
    #[arg(long)]
    force: bool,
  },
  /// Set the manual offline switch
  Offline {
    #[arg(value_enum)]
    mode: OfflineMode,
  },
  /// Run eviction, connectivity probing and sync-on-reconnect until Ctrl-C
  Daemon,
}

#[derive(Subcommand, Debug)]
enum QueueAction {
  /// Print the queued entries, oldest first
  List { kind: QueueKind },
  /// Drop one entry by its position
  Delete { kind: QueueKind, index: usize },
  /// Drop every entry
  Clear { kind: QueueKind },
  /// Empty all queues and the last sync totals
  Reset,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SyncTarget {
  Invoices,
  Payments,
  Customers,
  All,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OfflineMode {
  On,
  Off,
  Toggle,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  let level = args
    .log_level
    .clone()
    .unwrap_or_else(|| config.logging.level.clone());
  let _guard = logging::init(&config.log_dir(), &level)?;

  let engine = build_engine(&config).await?;
  let result = run(args.command, &engine).await;
  engine.shutdown().await;

  result
}

async fn build_engine(config: &Config) -> Result<Engine> {
  let data_dir = config.data_dir();
  std::fs::create_dir_all(&data_dir)
    .map_err(|e| eyre!("Failed to create data directory {}: {}", data_dir.display(), e))?;

  let mut builder = EngineBuilder::at_dir(&data_dir)?
    .eviction(config.eviction_config())
    .connectivity(config.connectivity.clone())
    .failure_policy(config.sync.failure_policy)
    .background_writes(config.sync.background_writes);

  if let Some(remote) = &config.remote {
    let credentials = Config::api_credentials();
    let http = HttpRemote::new(
      &remote.url,
      credentials.as_ref().map(|(k, s)| (k.as_str(), s.as_str())),
      remote.timeout,
    )?;
    let probe = HttpProbe::new(&remote.url, &config.connectivity)?;
    builder = builder.remote(Arc::new(http)).probe(Arc::new(probe));
  } else {
    info!("no remote configured, running offline only");
  }

  Ok(builder.build().await)
}

async fn run(command: Command, engine: &Engine) -> Result<()> {
  match command {
    Command::Status => print_status(engine).await,
    Command::Sync { target } => {
      if !engine.has_remote() {
        warn!("sync requested without a remote");
      }
      if matches!(target, SyncTarget::Customers | SyncTarget::All) {
        print_totals("customers", engine.sync_offline_customers().await);
      }
      if matches!(target, SyncTarget::Invoices | SyncTarget::All) {
        print_totals("invoices", engine.sync_offline_invoices().await);
      }
      if matches!(target, SyncTarget::Payments | SyncTarget::All) {
        print_totals("payments", engine.sync_offline_payments().await);
      }
    }
    Command::Queue { action } => match action {
      QueueAction::List { kind } => {
        for (index, entry) in engine.queues().raw_entries(kind).iter().enumerate() {
          println!("[{index}] {}", serde_json::to_string(entry)?);
        }
      }
      QueueAction::Delete { kind, index } => {
        if !engine.queues().delete_by_index(kind, index).await {
          return Err(eyre!("No {} entry at index {}", kind, index));
        }
        println!("Deleted {kind} entry {index}");
      }
      QueueAction::Clear { kind } => {
        engine.queues().clear(kind).await;
        println!("Cleared {kind} queue");
      }
      QueueAction::Reset => {
        engine.reset_offline_state().await;
        println!("Cleared every offline queue");
      }
    },
    Command::Usage => {
      let usage = engine.get_cache_usage_estimate().await;
      println!("{}", serde_json::to_string_pretty(&usage)?);
    }
    Command::Clear { force } => {
      if force {
        engine.force_clear_all_cache().await;
      } else {
        engine.clear_all_cache().await;
      }
      println!("Cache cleared");
    }
    Command::Offline { mode } => {
      let offline = match mode {
        OfflineMode::On => {
          engine.set_manual_offline(true).await;
          true
        }
        OfflineMode::Off => {
          engine.set_manual_offline(false).await;
          false
        }
        OfflineMode::Toggle => engine.toggle_manual_offline().await,
      };
      println!("Manual offline: {}", if offline { "on" } else { "off" });
    }
    Command::Daemon => {
      let daemon = engine.spawn_daemon();
      tokio::signal::ctrl_c().await?;
      info!("interrupt received, stopping daemon");
      daemon.shutdown().await;
    }
  }
  Ok(())
}

async fn print_status(engine: &Engine) {
  let state = engine.connectivity_state();
  println!(
    "Connectivity: {}",
    if state.offline() { "offline" } else { "online" }
  );
  println!("  manual offline: {}", state.manual_offline);
  println!("  remote configured: {}", engine.has_remote());

  println!("Queues:");
  for kind in QueueKind::ALL {
    println!("  {kind}: {}", engine.queues().pending(kind));
  }

  let last = engine.registry().last_sync_totals();
  println!(
    "Last invoice sync: {} synced, {} drafted, {} pending",
    last.synced, last.drafted, last.pending
  );

  let usage = engine.get_cache_usage_estimate().await;
  println!("Cache usage: {} bytes ({}%)", usage.total, usage.percentage);
}

fn print_totals(label: &str, totals: SyncTotals) {
  println!(
    "{label}: {} synced, {} drafted, {} pending",
    totals.synced, totals.drafted, totals.pending
  );
}
