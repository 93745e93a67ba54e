//! Storage-node HTTP surface: per-part write/read/inspect over a local
//! data directory, with sidecar metadata and GC.

mod gc;
mod sidecar;

pub use gc::{spawn_periodic, sweep_once};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::Json;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, instrument, warn};

use crate::errors::BlobError;
use crate::model::SidecarPart;
use crate::storage_client::{HEADER_CHECKSUM, HEADER_SIZE, HEADER_TOTAL_PARTS};
use crate::tee;

pub struct AppState {
    pub data_dir: PathBuf,
    pub gc_ttl: Duration,
    locks: sidecar::SidecarLocks,
}

impl AppState {
    pub fn new(data_dir: PathBuf, gc_ttl: Duration) -> Self {
        Self {
            data_dir,
            gc_ttl,
            locks: sidecar::SidecarLocks::new(),
        }
    }
}

pub fn router(state: Arc<AppState>) -> axum::Router {
    axum::Router::new()
        .route(
            "/parts/:file_id/:index",
            put(put_part).get(get_part).head(head_part),
        )
        .route("/admin/gc", post(trigger_gc))
        .route("/health", get(health))
        .with_state(state)
}

fn file_dir(state: &AppState, file_id: &str) -> PathBuf {
    state.data_dir.join(file_id)
}

fn part_path(state: &AppState, file_id: &str, index: usize) -> PathBuf {
    file_dir(state, file_id).join(format!("{index}.part"))
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[instrument(skip(state, headers, body))]
async fn put_part(
    State(state): State<Arc<AppState>>,
    Path((file_id, index)): Path<(String, usize)>,
    headers: HeaderMap,
    body: Body,
) -> Result<StatusCode, BlobError> {
    let total_parts = headers
        .get(HEADER_TOTAL_PARTS)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .ok_or_else(|| BlobError::BadRequest(format!("{HEADER_TOTAL_PARTS} missing or invalid")))?;
    let declared_size = header_u64(&headers, "content-length");
    let declared_digest = header_str(&headers, HEADER_CHECKSUM);

    let dir = file_dir(&state, &file_id);
    tokio::fs::create_dir_all(&dir).await?;

    let mut stream = StreamReader::new(body.into_data_stream().map_err(|e| {
        std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
    }));
    let path = part_path(&state, &file_id, index);
    let file = tokio::fs::File::create(&path).await?;
    let mut tee = tee::TeeWriter::new(file);
    tokio::io::copy(&mut stream, &mut tee).await?;
    tee.flush().await?;
    let written = tee.written();
    let digest = tee.finish();

    if let Some(declared) = declared_size {
        if declared > 0 && declared != written {
            return Err(BlobError::SizeMismatch {
                declared,
                received: written,
            });
        }
    }
    if let Some(expected) = &declared_digest {
        if expected.to_lowercase() != digest {
            return Err(BlobError::DigestMismatch);
        }
    }

    state
        .locks
        .with_lock(&file_id, || {
            sidecar::record_part(
                &state.data_dir,
                &file_id,
                total_parts,
                SidecarPart {
                    index,
                    size: written,
                    sha256: digest,
                },
            )
        })
        .await?;

    debug!("stored part {} of {} ({} bytes)", index, file_id, written);
    Ok(StatusCode::CREATED)
}

#[instrument(skip(state))]
async fn get_part(
    State(state): State<Arc<AppState>>,
    Path((file_id, index)): Path<(String, usize)>,
) -> Result<Response, BlobError> {
    let path = part_path(&state, &file_id, index);
    let file = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(BlobError::NotFound),
        Err(e) => return Err(e.into()),
    };
    let size = file.metadata().await?.len();
    let stream = ReaderStream::new(file);
    let body = Body::from_stream(stream);

    let mut headers = HeaderMap::new();
    headers.insert(
        "content-type",
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert("content-length", HeaderValue::from(size));
    headers.insert(HEADER_SIZE, HeaderValue::from(size));
    Ok((StatusCode::OK, headers, body).into_response())
}

#[instrument(skip(state))]
async fn head_part(
    State(state): State<Arc<AppState>>,
    Path((file_id, index)): Path<(String, usize)>,
) -> Result<Response, BlobError> {
    let sidecar = sidecar::load(&state.data_dir, &file_id).await?;
    let Some(part) = sidecar.and_then(|s| s.parts.get(&index).cloned()) else {
        return Err(BlobError::NotFound);
    };

    let mut headers = HeaderMap::new();
    headers.insert(HEADER_SIZE, HeaderValue::from(part.size));
    headers.insert(
        HEADER_CHECKSUM,
        HeaderValue::from_str(&part.sha256).map_err(|e| BlobError::Internal(e.to_string()))?,
    );
    Ok((StatusCode::OK, headers).into_response())
}

#[instrument(skip(state))]
async fn trigger_gc(State(state): State<Arc<AppState>>) -> StatusCode {
    sweep_once(&state.data_dir, state.gc_ttl).await;
    StatusCode::NO_CONTENT
}

#[derive(Serialize, Deserialize)]
struct Health {
    ok: bool,
    total_bytes: u64,
}

#[instrument(skip(state))]
async fn health(State(state): State<Arc<AppState>>) -> Json<Health> {
    let total_bytes = dir_size(&state.data_dir).await.unwrap_or_else(|e| {
        warn!("health: failed to compute total_bytes: {}", e);
        0
    });
    Json(Health {
        ok: true,
        total_bytes,
    })
}

fn dir_size(path: &std::path::Path) -> std::pin::Pin<Box<dyn std::future::Future<Output = std::io::Result<u64>> + Send + '_>> {
    Box::pin(async move {
        let mut total = 0;
        let mut entries = match tokio::fs::read_dir(path).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                total += dir_size(&entry.path()).await?;
            } else {
                total += entry.metadata().await?.len();
            }
        }
        Ok(total)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state() -> (tempfile::TempDir, Arc<AppState>) {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(AppState::new(dir.path().to_path_buf(), Duration::from_secs(3600)));
        (dir, state)
    }

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let (_dir, state) = test_state();
        let app = router(state);

        let put_req = Request::builder()
            .method("PUT")
            .uri("/parts/file1/0")
            .header(HEADER_TOTAL_PARTS, "1")
            .header("content-length", "5")
            .body(Body::from("hello"))
            .unwrap();
        let resp = app.clone().oneshot(put_req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let get_req = Request::builder()
            .method("GET")
            .uri("/parts/file1/0")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(get_req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"hello");
    }

    #[tokio::test]
    async fn put_rejects_missing_total_parts() {
        let (_dir, state) = test_state();
        let app = router(state);
        let req = Request::builder()
            .method("PUT")
            .uri("/parts/file1/0")
            .body(Body::from("hello"))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn put_rejects_size_mismatch() {
        let (_dir, state) = test_state();
        let app = router(state);
        let req = Request::builder()
            .method("PUT")
            .uri("/parts/file1/0")
            .header(HEADER_TOTAL_PARTS, "1")
            .header("content-length", "99")
            .body(Body::from("hello"))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn put_rejects_digest_mismatch_without_updating_sidecar() {
        let (_dir, state) = test_state();
        let app = router(state.clone());
        let req = Request::builder()
            .method("PUT")
            .uri("/parts/file1/0")
            .header(HEADER_TOTAL_PARTS, "1")
            .header(HEADER_CHECKSUM, "f".repeat(64))
            .body(Body::from("hello"))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let sidecar = sidecar::load(&state.data_dir, "file1").await.unwrap();
        assert!(sidecar.is_none());
    }

    #[tokio::test]
    async fn head_missing_part_is_404() {
        let (_dir, state) = test_state();
        let app = router(state);
        let req = Request::builder()
            .method("HEAD")
            .uri("/parts/file1/0")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_reports_total_bytes() {
        let (_dir, state) = test_state();
        let app = router(state.clone());

        let put_req = Request::builder()
            .method("PUT")
            .uri("/parts/file1/0")
            .header(HEADER_TOTAL_PARTS, "1")
            .body(Body::from("hello"))
            .unwrap();
        app.clone().oneshot(put_req).await.unwrap();

        let req = Request::builder()
            .method("GET")
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let health: Health = serde_json::from_slice(&bytes).unwrap();
        assert!(health.total_bytes > 0);
    }
}
