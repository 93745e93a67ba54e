//! Durable key→file-record index keyed by file ID.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;

use crate::errors::BlobError;
use crate::model::File;

/// Persists and retrieves the per-file record built by the file service.
/// Any concrete store must be safe under concurrent callers; the upload
/// path calls `save` exactly once per successful upload.
#[async_trait]
pub trait MetaStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<File, BlobError>;
    async fn save(&self, file: &File) -> Result<(), BlobError>;
}

/// Build a [`MetaStore`] from a DSN, matching the original's `migrate`
/// convention: a `memory://` scheme selects the in-memory store, anything
/// else is treated as a sqlite file path.
pub async fn open(dsn: &str) -> Result<Box<dyn MetaStore>, BlobError> {
    let dsn = dsn.trim();
    if dsn.is_empty() || dsn.starts_with("memory://") {
        return Ok(Box::new(MemoryStore::new()));
    }
    let path = dsn.strip_prefix("sqlite://").unwrap_or(dsn);
    Ok(Box::new(SqliteStore::open(path).await?))
}
