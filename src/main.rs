//! `coach` command-line entry point.
//!
//! - `serve`  - run the sync HTTP server
//! - `mcp`    - run the authoring tool server on stdio
//! - `ingest` - load a `{date: program}` JSON file into the database
//! - `sync`   - run one client sync cycle against a server

use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::{Path, PathBuf};
use tokio::net::TcpListener;
use tracing::{error, info};

use coach_tracker_lib::commands::{ingest, Tools};
use coach_tracker_lib::config::{ClientConfig, ServerConfig};
use coach_tracker_lib::db::Storage;
use coach_tracker_lib::sync::{HttpTransport, SqliteStore, SyncAgent, SyncCoordinator, SyncOutcome};
use coach_tracker_lib::{http, logging, mcp};

#[derive(Parser)]
#[command(name = "coach")]
#[command(author, version, about, long_about = None)]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Run the sync HTTP server
  Serve {
    /// Port to bind (overrides COACH_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Use the test port by default
    #[arg(long)]
    test: bool,
  },

  /// Serve the plan-authoring tools over stdio (JSON-RPC)
  Mcp,

  /// Write every plan in a `{date: program}` JSON file
  Ingest {
    file: PathBuf,

    /// Plans are already flat; skip the block transform
    #[arg(long)]
    raw: bool,
  },

  /// Run one sync cycle with the server at COACH_SERVER_URL
  Sync,
}

type CliResult = Result<(), Box<dyn Error>>;

#[tokio::main]
async fn main() {
  dotenvy::dotenv().ok();
  logging::init();

  let cli = Cli::parse();
  let result = match cli.command {
    Commands::Serve { port, test } => serve(port, test).await,
    Commands::Mcp => run_mcp().await,
    Commands::Ingest { file, raw } => run_ingest(&file, raw).await,
    Commands::Sync => run_sync().await,
  };

  if let Err(e) = result {
    error!("{}", e);
    std::process::exit(1);
  }
}

async fn serve(port: Option<u16>, test: bool) -> CliResult {
  let mut config = ServerConfig::from_env(test)?;
  if let Some(port) = port {
    config.port = port;
  }
  config.validate()?;

  let storage = Storage::open(&config.db_path, config.max_rows).await?;
  info!(db = %config.db_path.display(), "database ready");
  let coordinator = SyncCoordinator::new(storage.reader(), storage.writer(), config.full_sync_days);

  let listener = TcpListener::bind(config.bind_addr()).await?;
  http::serve_until(listener, coordinator, async {
    if let Err(e) = tokio::signal::ctrl_c().await {
      error!("failed to listen for ctrl-c: {}", e);
    }
  })
  .await?;

  storage.close().await;
  Ok(())
}

async fn run_mcp() -> CliResult {
  let config = ServerConfig::from_env(false)?;
  config.validate_for_tools()?;

  let storage = Storage::open(&config.db_path, config.max_rows).await?;
  mcp::run_stdio(Tools::new(storage.reader(), storage.writer())).await?;
  storage.close().await;
  Ok(())
}

async fn run_ingest(file: &Path, raw: bool) -> CliResult {
  let config = ServerConfig::from_env(false)?;
  config.validate()?;

  let text = tokio::fs::read_to_string(file).await?;
  let parsed: serde_json::Value = serde_json::from_str(&text)?;
  let plans = parsed
    .as_object()
    .ok_or("ingest file must be a JSON object keyed by date")?;

  let storage = Storage::open(&config.db_path, config.max_rows).await?;
  let report = ingest::ingest(&storage.writer(), plans, !raw).await;
  storage.close().await;

  println!("{}", serde_json::to_string_pretty(&report)?);
  if !report.success {
    return Err(format!("{} of {} dates failed", report.failed, report.results.len()).into());
  }
  Ok(())
}

async fn run_sync() -> CliResult {
  let config = ClientConfig::from_env()?;
  let transport = HttpTransport::new(&config.base_url)?;
  let store = SqliteStore::open(&config.store_path).await?;
  let agent = SyncAgent::open(transport, store.clone(), config.client_name.clone()).await?;

  let outcome = agent.sync().await;
  store.close().await;
  match outcome? {
    SyncOutcome::Completed(report) => info!(
      uploaded = report.uploaded.len(),
      plans = report.plans_received,
      logs = report.logs_merged.len(),
      kept_local = report.logs_kept_local.len(),
      "sync complete"
    ),
    SyncOutcome::Offline => info!("server unreachable, nothing synced"),
    SyncOutcome::AlreadySyncing => info!("another sync is running"),
  }
  println!("{}", agent.snapshot().indicator());
  Ok(())
}
