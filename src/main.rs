use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sentinel_backend::config::{Config, LogFormat};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "sentinel-backend",
    about = "Alert ingestion and normalization backend for CrowdSec-style intrusion detection agents",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML config file (default: $SENTINEL_CONFIG, then /etc/sentinel/sentinel.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the SQLite database path
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (ingestion API + upstream sync loop)
    Serve {
        /// Bind address
        #[arg(long)]
        bind: Option<String>,

        /// Serve push ingestion only, without polling the agent
        #[arg(long)]
        no_sync: bool,
    },

    /// Pull alerts from the agent once and exit
    SyncOnce,

    /// Print stored alerts, newest first
    List {
        /// Maximum number of alerts to print
        #[arg(long, default_value = "50")]
        limit: usize,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Ingest raw alerts from a JSON file (one object or an array)
    Ingest {
        /// Path to the JSON file
        file: PathBuf,
    },
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, warnings) = Config::resolve(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.storage.db_path = db;
    }

    init_tracing(&config);
    for warning in &warnings {
        tracing::warn!("{warning}");
    }
    tracing::debug!(?config, "configuration resolved");

    match cli.command {
        Commands::Serve { bind, no_sync } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if no_sync {
                config.sync.enabled = false;
            }
            tracing::info!(bind = %config.server.bind, "Starting sentinel backend");
            sentinel_backend::serve(config).await?;
        }
        Commands::SyncOnce => {
            tracing::info!(upstream = %config.upstream.base_url, "Running a single sync cycle");
            let report = sentinel_backend::sync_once(&config).await?;
            println!(
                "Fetched {} alert(s): {} inserted, {} already stored, {} rejected",
                report.fetched, report.inserted, report.skipped, report.rejected
            );
        }
        Commands::List { limit, json } => {
            let pool = sentinel_backend::storage::open_pool(&config.storage.db_path)?;
            let store = sentinel_backend::storage::AlertStore::new(pool);
            let alerts = store.list(Some(limit))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&alerts)?);
            } else if alerts.is_empty() {
                println!("No alerts stored.");
            } else {
                println!(
                    "{:<36} | {:<30} | {:<15} | {:<8} | Timestamp",
                    "ID", "Event", "Source IP", "Severity"
                );
                println!("{:-<36}-|-{:-<30}-|-{:-<15}-|-{:-<8}-|-{:-<20}", "", "", "", "", "");
                for a in &alerts {
                    println!(
                        "{:<36} | {:<30} | {:<15} | {:<8} | {}",
                        a.id,
                        a.event,
                        a.source_ip,
                        a.severity,
                        a.timestamp.to_rfc3339()
                    );
                }
                println!("\n{} of {} alert(s) shown", alerts.len(), store.count()?);
            }
        }
        Commands::Ingest { file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let body: serde_json::Value = serde_json::from_str(&content)
                .with_context(|| format!("{} is not valid JSON", file.display()))?;

            let pool = sentinel_backend::storage::open_pool(&config.storage.db_path)?;
            let store = sentinel_backend::storage::AlertStore::new(pool);
            let normalizer = sentinel_backend::normalize::Normalizer::new(config.sync.id_fallback);
            let summary = sentinel_backend::ingest::receive_async(store, normalizer, body).await?;

            println!(
                "Submitted {}: {} received, {} inserted, {} rejected",
                summary.submitted, summary.received, summary.inserted, summary.rejected
            );
        }
    }

    Ok(())
}
