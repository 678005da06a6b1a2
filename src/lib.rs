//! Sentinel backend -- alert ingestion for a CrowdSec-style intrusion detection agent.
//!
//! Alerts arrive two ways: polled from the agent's local API by the sync loop,
//! or pushed by the agent to `POST /alerts`. Both paths normalize the raw
//! payload into one [`model::AlertRecord`] and store it at most once.

pub mod api;
pub mod config;
pub mod ingest;
pub mod model;
pub mod normalize;
pub mod storage;
pub mod sync;
pub mod upstream;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;

use crate::config::Config;
use crate::normalize::Normalizer;
use crate::storage::AlertStore;
use crate::sync::{CycleReport, SyncLoop};
use crate::upstream::{AlertSource, LapiSource};

/// Start the daemon: API server plus, if enabled, the pull-mode sync loop.
pub async fn serve(config: Config) -> Result<()> {
    // 1. Initialize Storage
    tracing::info!(db_path = %config.storage.db_path, "Initializing database");
    let pool = storage::open_pool(&config.storage.db_path)?;
    let store = AlertStore::new(pool);
    let normalizer = Normalizer::new(config.sync.id_fallback);

    // 2. Start Sync Loop (background task)
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sync_task = if config.sync.enabled {
        let source = Arc::new(LapiSource::new(&config.upstream)?);
        let mut sync_loop =
            SyncLoop::new(source, store.clone(), normalizer, config.sync.interval());
        Some(tokio::spawn(async move {
            if let Err(e) = sync_loop.run(shutdown_rx).await {
                tracing::error!(error = %e, "Sync loop exited; push ingestion is still served");
            }
        }))
    } else {
        tracing::info!("Pull sync disabled, serving push ingestion only");
        None
    };

    // 3. Start API Server
    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", config.server.bind))?;
    let app = api::router(api::state::AppState { store, normalizer });

    tracing::info!(%addr, "Sentinel backend listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 4. Let the sync loop finish its current cycle
    let _ = shutdown_tx.send(true);
    if let Some(task) = sync_task {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Sync task did not shut down cleanly");
        }
    }

    Ok(())
}

/// Run a single pull cycle against the configured agent.
pub async fn sync_once(config: &Config) -> Result<CycleReport> {
    let pool = storage::open_pool(&config.storage.db_path)?;
    let store = AlertStore::new(pool);
    let source = Arc::new(LapiSource::new(&config.upstream)?);

    source.authenticate().await?;
    let mut sync_loop = SyncLoop::new(
        source,
        store,
        Normalizer::new(config.sync.id_fallback),
        config.sync.interval(),
    );
    Ok(sync_loop.run_cycle().await?)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
