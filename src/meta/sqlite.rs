//! Sqlite-backed meta store: one row per file, the record stored as a
//! JSON blob and upserted — the same shape as the original's
//! Postgres-backed store, swapped to an embedded database.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection};

use super::MetaStore;
use crate::errors::BlobError;
use crate::model::File;

pub const CREATE_TABLE_SQL: &str = "
CREATE TABLE IF NOT EXISTS files_meta (
    id      TEXT PRIMARY KEY,
    payload TEXT NOT NULL
)";

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, BlobError> {
        let path = path.into();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(path).map_err(to_internal)?;
            conn.execute(CREATE_TABLE_SQL, []).map_err(to_internal)?;
            Ok(Self {
                conn: Arc::new(Mutex::new(conn)),
            })
        })
        .await
        .map_err(|e| BlobError::Internal(format!("spawn_blocking join failed: {e}")))?
    }
}

fn to_internal(err: rusqlite::Error) -> BlobError {
    BlobError::Internal(err.to_string())
}

#[async_trait]
impl MetaStore for SqliteStore {
    async fn get(&self, id: &str) -> Result<File, BlobError> {
        let conn = self.conn.clone();
        let id = id.to_string();
        let payload = tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            conn.query_row(
                "SELECT payload FROM files_meta WHERE id = ?1",
                params![id],
                |row| row.get::<_, String>(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => BlobError::NotFound,
                other => to_internal(other),
            })
        })
        .await
        .map_err(|e| BlobError::Internal(format!("spawn_blocking join failed: {e}")))??;

        serde_json::from_str(&payload).map_err(BlobError::from)
    }

    async fn save(&self, file: &File) -> Result<(), BlobError> {
        let payload = serde_json::to_string(file)?;
        let id = file.id.clone();
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            conn.execute(
                "INSERT INTO files_meta (id, payload) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET payload = excluded.payload",
                params![id, payload],
            )
            .map_err(to_internal)?;
            Ok(())
        })
        .await
        .map_err(|e| BlobError::Internal(format!("spawn_blocking join failed: {e}")))?
    }
}
