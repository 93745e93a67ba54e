//! `blobmesh-front` — the file service + router HTTP surface.

use std::sync::Arc;

use blobmesh::api::{self, AppState};
use blobmesh::config::Config;
use blobmesh::file_service::FileService;
use blobmesh::meta;
use blobmesh::router::{DefaultHealthAdapter, Router};
use blobmesh::storage_client::HttpStorageClient;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "blobmesh-front")]
#[command(version, about = "Front-end for the blobmesh distributed blob store")]
struct Cli {
    /// Path to configuration file (overrides CONFIG_PATH)
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Listen address (overrides config)
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<String>,
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

    let mut config = if let Some(ref path) = cli.config {
        Config::from_file(path)?
    } else {
        Config::load()
    };
    if let Some(ref addr) = cli.listen {
        config.listen_addr = addr.parse()?;
    }

    info!("starting blobmesh-front v{}", env!("CARGO_PKG_VERSION"));
    info!("  listen address: {}", config.listen_addr);
    info!("  meta dsn: {}", config.meta_dsn);
    info!("  desired parts: {}", config.desired_parts);
    info!("  configured storages: {}", config.storages.len());

    let meta_store = meta::open(&config.meta_dsn).await?;
    let health = DefaultHealthAdapter::new(config.max_storage_load_bytes);
    let router = Arc::new(Router::new(Box::new(health)));
    router.set(config.storages.clone());

    let storage_client = Arc::new(HttpStorageClient::new());
    let service = Arc::new(FileService::new(
        router,
        storage_client,
        Arc::from(meta_store),
        config.desired_parts,
    ));

    let state = AppState {
        service,
        config: Arc::new(config.clone()),
    };
    let app = api::router(state);

    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!("blobmesh-front listening on http://{}", config.listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("blobmesh-front shutdown complete");
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
