//! `blobmesh-migrate` — applies the sqlite meta-store schema.
//!
//! Mirrors the original's standalone `cmd/migrate` binary: opening a
//! [`SqliteStore`] already executes its `CREATE TABLE IF NOT EXISTS`, so
//! migration here is just "open and close" — a separate step from
//! `blobmesh-front` so the schema can be provisioned ahead of the first
//! request in environments that forbid DDL from the serving process.

use blobmesh::meta::SqliteStore;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "blobmesh-migrate")]
#[command(version, about = "Applies the blobmesh sqlite meta-store schema")]
struct Cli {
    /// Path to the sqlite database file (defaults to $META_DSN with the
    /// sqlite:// prefix stripped, or ./blobmesh.db)
    #[arg(value_name = "PATH")]
    path: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("blobmesh=info")),
        )
        .init();

    let cli = Cli::parse();
    let path = cli.path.unwrap_or_else(|| {
        std::env::var("META_DSN")
            .ok()
            .and_then(|dsn| dsn.strip_prefix("sqlite://").map(str::to_string))
            .unwrap_or_else(|| "./blobmesh.db".to_string())
    });

    info!("applying schema to {}", path);
    SqliteStore::open(path.clone()).await?;
    info!("schema up to date at {}", path);
    Ok(())
}
