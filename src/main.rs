mod cache;
mod config;
mod error;
mod event;
mod logging;
mod network;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use cache::{CacheStore, InstallReport, OfflineCache, Request, SqliteStore};
use event::Worker;
use network::HttpNetwork;

#[derive(Parser, Debug)]
#[command(name = "ulisse-offline")]
#[command(about = "Offline cache interceptor for the Ulisse voice-creator dashboard")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/ulisse-offline/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Origin the manifest locators are fetched from
  #[arg(long)]
  origin: Option<String>,

  /// Cache generation tag to work on
  #[arg(short, long)]
  tag: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Populate the current cache generation from the manifest
  Install,
  /// Delete every cache generation except the current one
  Activate,
  /// Install the current generation, then reap the older ones
  Upgrade,
  /// Route one request through the interceptor
  Fetch {
    /// Locator, relative to the origin or absolute
    locator: String,

    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Write the response body to this file
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// List cache generations and their entry counts
  Generations,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration, command line wins over the file
  let config = config::Config::load(args.config.as_deref())?.with_overrides(args.origin, args.tag);
  let _log_guard = logging::init(&config.log)?;

  let storage = Arc::new(SqliteStore::open(&config.cache.database_path()?)?);
  let network = Arc::new(HttpNetwork::new(&config.origin)?);
  let cache = OfflineCache::shared(Arc::clone(&storage), network);
  let tag = config.cache.tag.clone();

  let (handle, worker) = Worker::spawn(cache, config.cache.manifest, tag.clone());

  match args.command {
    Command::Install => {
      let report = handle.install().await?;
      print_installed(&report);
    }
    Command::Activate => {
      let reaped = handle.activate().await?;
      print_reaped(&tag, &reaped);
    }
    Command::Upgrade => {
      let report = handle.install().await?;
      print_installed(&report);
      let reaped = handle.activate().await?;
      print_reaped(&tag, &reaped);
    }
    Command::Fetch {
      locator,
      method,
      output,
    } => {
      let method = Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;
      let served = handle.fetch(Request::new(method, locator)).await?;

      println!(
        "{} from {} ({} bytes)",
        served.response.status,
        served.source,
        served.response.body.len()
      );
      if let Some(cached_at) = served.cached_at {
        println!("cached at {}", cached_at.to_rfc3339());
      }
      if let Some(path) = output {
        std::fs::write(&path, &served.response.body)
          .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?;
      }
    }
    Command::Generations => list_generations(storage.as_ref(), &tag)?,
  }

  // Dropping the last handle stops the worker
  drop(handle);
  worker.await?;

  info!(tag = %tag, "done");
  Ok(())
}

fn list_generations(store: &impl CacheStore, current: &str) -> Result<()> {
  let generations = store.list_generations()?;
  if generations.is_empty() {
    println!("no cache generations");
  }

  for generation in generations {
    let marker = if generation == current { "*" } else { " " };
    println!("{} {} ({} entries)", marker, generation, store.entry_count(&generation)?);
  }

  Ok(())
}

fn print_installed(report: &InstallReport) {
  println!(
    "installed {} ({} entries, {} bytes)",
    report.tag, report.entries, report.bytes
  );
}

fn print_reaped(tag: &str, reaped: &[String]) {
  if reaped.is_empty() {
    println!("activated {}, nothing to reap", tag);
  } else {
    println!("activated {}, reaped {}", tag, reaped.join(", "));
  }
}
