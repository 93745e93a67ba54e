//! `blobmesh-storage` — the storage-node HTTP surface + GC loop.

use std::sync::Arc;
use std::time::Duration;

use blobmesh::config::StorageConfig;
use blobmesh::storage_node::{self, AppState};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "blobmesh-storage")]
#[command(version, about = "Storage node for the blobmesh distributed blob store")]
struct Cli {
    /// Listen address (overrides config/env)
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<String>,

    /// Data directory (overrides config/env)
    #[arg(short, long, value_name = "DIR")]
    data_dir: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("blobmesh=info")),
        )
        .init();

    let mut config = StorageConfig::load();
    if let Some(ref addr) = cli.listen {
        config.listen_addr = addr.parse()?;
    }
    if let Some(ref dir) = cli.data_dir {
        config.data_dir = dir.into();
    }

    info!("starting blobmesh-storage v{}", env!("CARGO_PKG_VERSION"));
    info!("  listen address: {}", config.listen_addr);
    info!("  data directory: {:?}", config.data_dir);
    info!(
        "  gc: every {}m, ttl {}h",
        config.gc_interval_min, config.gc_ttl_hours
    );

    tokio::fs::create_dir_all(&config.data_dir).await?;

    let gc_ttl = Duration::from_secs(config.gc_ttl_hours * 3600);
    let state = Arc::new(AppState::new(config.data_dir.clone(), gc_ttl));

    storage_node::spawn_periodic(
        config.data_dir.clone(),
        gc_ttl,
        Duration::from_secs(config.gc_interval_min * 60),
    );

    let app = storage_node::router(state);
    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!(
        "blobmesh-storage listening on http://{}",
        config.listen_addr
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("blobmesh-storage shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => warn!("received Ctrl+C, shutting down"),
        _ = terminate => warn!("received SIGTERM, shutting down"),
    }
}
