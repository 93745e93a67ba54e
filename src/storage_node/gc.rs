//! Periodic sweep of incomplete upload directories older than a TTL.

use std::path::Path;
use std::time::{Duration, SystemTime};

use tokio::fs;
use tracing::{debug, info, warn};

/// Remove `<data_dir>/<fileID>/` directories whose `meta.json` is older
/// than `ttl` and whose sidecar `parts` map is a strict subset of
/// `total_parts`. Directories without a `meta.json` are left alone (an
/// upload may be mid-creation).
pub async fn sweep_once(data_dir: &Path, ttl: Duration) -> usize {
    let mut removed = 0;
    let mut entries = match fs::read_dir(data_dir).await {
        Ok(e) => e,
        Err(e) => {
            warn!("gc: failed to read data dir {:?}: {}", data_dir, e);
            return 0;
        }
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let file_id = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => continue,
        };

        let meta_path = path.join("meta.json");
        let metadata = match fs::metadata(&meta_path).await {
            Ok(m) => m,
            Err(_) => continue,
        };
        let mtime = match metadata.modified() {
            Ok(m) => m,
            Err(_) => continue,
        };
        let age = SystemTime::now()
            .duration_since(mtime)
            .unwrap_or(Duration::ZERO);
        if age < ttl {
            continue;
        }

        let sidecar = match super::sidecar::load(data_dir, file_id).await {
            Ok(Some(s)) => s,
            _ => continue,
        };
        if sidecar.parts.len() >= sidecar.total_parts {
            continue;
        }

        if let Err(e) = fs::remove_dir_all(&path).await {
            warn!("gc: failed to remove {:?}: {}", path, e);
            continue;
        }
        debug!("gc: removed incomplete upload {}", file_id);
        removed += 1;
    }

    if removed > 0 {
        info!("gc: swept {} incomplete upload(s)", removed);
    }
    removed
}

/// Spawn the periodic sweep loop for the `storage` binary.
pub fn spawn_periodic(data_dir: std::path::PathBuf, ttl: Duration, interval: Duration) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        loop {
            tick.tick().await;
            sweep_once(&data_dir, ttl).await;
        }
    });
}
