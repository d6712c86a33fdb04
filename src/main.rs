use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use homesync::cache::{CacheStore, SqliteStorage};
use homesync::config::Config;
use homesync::db::Database;
use homesync::engine::{Backends, Engine};
use homesync::event::{EventLoop, EventSender};
use homesync::host::MemoryHost;
use homesync::net::{Destination, HttpClient, Method, Request};
use homesync::sync::{MemoryStore, SqliteStore};

#[derive(Parser, Debug)]
#[command(name = "homesync")]
#[command(about = "Offline caching and background sync engine")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/homesync/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Keep caches and queues in memory only
  #[arg(long, global = true)]
  ephemeral: bool,

  /// More logging (-v info, -vv debug)
  #[arg(short, long, action = clap::ArgAction::Count, global = true)]
  verbose: u8,

  /// Also write logs to a daily rotated file in this directory
  #[arg(long, global = true)]
  log_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Seed the static cache for the configured version
  Install,
  /// Evict old cache generations and claim clients
  Activate,
  /// Fetch a URL through the engine
  Fetch {
    url: String,
    #[arg(long, default_value = "empty")]
    destination: Destination,
    #[arg(long, default_value = "GET")]
    method: Method,
  },
  /// Queue a mutation for background sync
  Enqueue { tag: String, payload: String },
  /// Replay the queue registered under a sync tag
  Sync { tag: String },
  /// Deliver a push payload, optionally clicking the notification
  Push {
    payload: Option<String>,
    /// Click with this action id ("default" for a plain click)
    #[arg(long)]
    click: Option<String>,
  },
  /// Show generation, partitions and queued tasks
  Status,
}

fn init_tracing(verbose: u8, log_dir: Option<&PathBuf>) -> Option<WorkerGuard> {
  // RUST_LOG wins; otherwise -v raises the default level
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
    EnvFilter::new(match verbose {
      0 => "warn",
      1 => "info",
      _ => "debug",
    })
  });

  let (file_layer, guard) = match log_dir {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "homesync.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
    }
    None => (None, None),
  };

  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(io::stderr))
    .with(file_layer)
    .with(filter)
    .init();

  guard
}

fn backends(config: &Config, ephemeral: bool) -> Result<Backends> {
  let network = Arc::new(HttpClient::new(config.request_timeout())?);
  let host = Arc::new(MemoryHost::new());

  let (cache, sync_store): (CacheStore, Arc<dyn homesync::sync::KeyValueStore>) = if ephemeral {
    (CacheStore::in_memory(), Arc::new(MemoryStore::new()))
  } else {
    let db = Database::open(config.database.as_deref())?;
    (
      CacheStore::new(SqliteStorage::new(db.clone())),
      Arc::new(SqliteStore::new(db)),
    )
  };

  Ok(Backends {
    cache,
    sync_store,
    network,
    clients: host.clone(),
    notifier: host,
  })
}

async fn run(command: Command, engine: &Engine, events: &EventSender, config: &Config) -> Result<()> {
  match command {
    Command::Install => {
      let report = events.install().await?;
      println!("cached {} assets", report.assets);
      if let Some(activation) = report.activation {
        println!(
          "activated {} (deleted {} old partitions)",
          config.version,
          activation.deleted.len()
        );
      }
    }
    Command::Activate => {
      let report = events.activate().await?;
      for name in &report.deleted {
        println!("deleted {}", name);
      }
      println!("active: {} (claimed {} clients)", config.version, report.claimed);
    }
    Command::Fetch {
      url,
      destination,
      method,
    } => {
      let url = config
        .origin_url()?
        .join(&url)
        .map_err(|e| eyre!("Invalid URL {}: {}", url, e))?;
      let request = Request::new(method, url).with_destination(destination);
      let response = events.fetch(request).await?;
      eprintln!("{} ({:?})", response.status(), response.source());
      println!("{}", response.text());
    }
    Command::Enqueue { tag, payload } => {
      let payload: serde_json::Value =
        serde_json::from_str(&payload).map_err(|e| eyre!("Payload is not JSON: {}", e))?;
      let task = events.enqueue(tag, payload).await?;
      println!("queued {} for {}", task.id, task.endpoint);
    }
    Command::Sync { tag } => {
      let report = events.sync(tag).await?;
      println!("replayed {}, remaining {}", report.replayed, report.remaining);
      if let Some(id) = report.failed {
        println!("stopped at {}", id);
      }
    }
    Command::Push { payload, click } => {
      let notification = events.push(payload.map(String::into_bytes)).await?;
      println!("{}", serde_json::to_string_pretty(&notification)?);
      if let Some(action) = click {
        let action = (action != "default").then_some(action);
        let outcome = events.notification_click(notification, action).await?;
        println!("{:?}", outcome);
      }
    }
    Command::Status => {
      let status = engine.status().await?;
      println!("version: {} ({})", status.version, status.state);
      for (name, count) in status.partitions {
        println!("  {:<32} {} entries", name, count);
      }
      for (tag, count) in status.pending {
        println!("  {:<32} {} queued", tag, count);
      }
    }
  }
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_tracing(args.verbose, args.log_dir.as_ref());

  let config = Config::load(args.config.as_deref())?;
  let engine = Arc::new(Engine::new(&config, backends(&config, args.ephemeral)?)?);
  info!(version = %config.version, origin = %config.origin, "engine ready");

  let (event_loop, events) = EventLoop::new(engine.clone());
  let running = tokio::spawn(event_loop.run());

  let result = run(args.command, &engine, &events, &config).await;

  // Let in-flight handlers and revalidations finish before exiting
  drop(events);
  running.await?;
  result
}
