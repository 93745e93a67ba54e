//! Sidecar `meta.json` read-modify-write, serialized per file ID.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::fs;

use crate::errors::BlobError;
use crate::model::{SidecarMeta, SidecarPart};

/// Keyed lock table guarding sidecar read-modify-write across concurrent
/// PUTs for different indices of the same file ID.
#[derive(Default)]
pub struct SidecarLocks {
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl SidecarLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, file_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .entry(file_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Run `f` while holding the per-`file_id` lock.
    pub async fn with_lock<F, Fut, T>(&self, file_id: &str, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let lock = self.entry(file_id);
        let _guard = lock.lock().await;
        f().await
    }
}

fn sidecar_path(data_dir: &Path, file_id: &str) -> PathBuf {
    data_dir.join(file_id).join("meta.json")
}

pub async fn load(data_dir: &Path, file_id: &str) -> Result<Option<SidecarMeta>, BlobError> {
    let path = sidecar_path(data_dir, file_id);
    match fs::read(&path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub async fn save(data_dir: &Path, meta: &SidecarMeta) -> Result<(), BlobError> {
    let dir = data_dir.join(&meta.file_id);
    fs::create_dir_all(&dir).await?;
    let body = serde_json::to_vec(meta)?;
    fs::write(sidecar_path(data_dir, &meta.file_id), body).await?;
    Ok(())
}

/// Load-if-present, merge `part` in, write back. Must be called under the
/// `file_id`'s [`SidecarLocks`] guard.
pub async fn record_part(
    data_dir: &Path,
    file_id: &str,
    total_parts: usize,
    part: SidecarPart,
) -> Result<(), BlobError> {
    let mut meta = load(data_dir, file_id)
        .await?
        .unwrap_or_else(|| SidecarMeta::new(file_id, total_parts));
    meta.total_parts = total_parts;
    meta.parts.insert(part.index, part);
    save(data_dir, &meta).await
}
