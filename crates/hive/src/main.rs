//! Hive Server
//!
//! Multi-tenant script runtime host with an HTTP/WebSocket API.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use hive::broker::SessionHub;
use hive::config::HostConfig;
use hive::project::ProjectLoader;
use hive::registry::Registry;
use hive::server::{AppState, create_router};
use hive_store::{
    BlobStore, DocStore, LocalBlobStore, MemoryBlobStore, MemoryStore, RedbStore,
};

/// Hive mini-service runtime host
#[derive(Parser, Debug)]
#[command(name = "hived")]
#[command(about = "Hive mini-service runtime host", long_about = None)]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server host address (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Server port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Data directory for durable storage (overrides config)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Directory of projects to start on boot (<dir>/<project>/*.js)
    #[arg(short, long)]
    projects: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("hive=info,tower_http=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = HostConfig::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(data_dir) = args.data_dir {
        config.storage.data_dir = Some(data_dir);
    }

    info!("Starting hive v{}", env!("CARGO_PKG_VERSION"));

    let (store, blobs): (Arc<dyn DocStore>, Arc<dyn BlobStore>) = match &config.storage.data_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            info!("Using durable storage at {}", dir.display());
            (
                Arc::new(RedbStore::open(dir.join("documents.redb"))?),
                Arc::new(LocalBlobStore::new(dir.join("blobs"))),
            )
        }
        None => {
            info!("No data directory configured, using in-memory storage");
            (
                Arc::new(MemoryStore::new()),
                Arc::new(MemoryBlobStore::new()),
            )
        }
    };

    let hub = Arc::new(SessionHub::new());
    let registry = Registry::new(store, blobs, hub.clone(), config.runtime.clone());

    if let Some(dir) = &args.projects {
        info!("Loading projects from {}", dir.display());
        for (project_id, source) in ProjectLoader::load_dir(dir).await? {
            match registry.start(&project_id, source).await {
                Ok(()) => info!(project_id = %project_id, "project started"),
                Err(err) => {
                    error!(project_id = %project_id, error = %err, "project failed to start");
                }
            }
        }
    }

    let state = AppState::new(registry.clone(), hub);
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on http://{addr}");
    info!("WebSocket endpoint: ws://{addr}/ws");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(registry))
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Wait for a shutdown signal, then stop every running project.
async fn shutdown_signal(registry: Arc<Registry>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        },
    }

    registry.stop_all().await;
}
