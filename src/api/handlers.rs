//! Front-end request handlers: upload, download, admin.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::io::StreamReader;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::config::Config;
use crate::errors::BlobError;
use crate::file_service::FileService;
use crate::storage_client::StorageClient;

pub struct AppState<C> {
    pub service: Arc<FileService<C>>,
    pub config: Arc<Config>,
}

impl<C> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            config: self.config.clone(),
        }
    }
}

pub fn router<C: StorageClient + 'static>(state: AppState<C>) -> axum::Router {
    axum::Router::new()
        .route("/files", post(post_files))
        .route("/files/:id", get(get_file))
        .route("/admin/storages", post(add_storages))
        .route("/admin/config", get(get_config))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct PostFilesResponse {
    file_id: String,
    size: u64,
    parts: usize,
}

#[derive(Debug, Deserialize, Default)]
pub struct FilenameQuery {
    pub filename: Option<String>,
}

fn header_name(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[instrument(skip(state, headers, body))]
async fn post_files<C: StorageClient + 'static>(
    State(state): State<AppState<C>>,
    Query(query): Query<FilenameQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, BlobError> {
    let size = headers
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .ok_or_else(|| BlobError::BadRequest("Content-Length is required".to_string()))?;

    let name = header_name(&headers, "X-File-Name")
        .or_else(|| header_name(&headers, "X-Filename"))
        .or(query.filename);

    let reader = StreamReader::new(
        body.into_data_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string())),
    );

    let outcome = state.service.upload(reader, size, name).await?;
    info!(
        "uploaded {} ({} bytes, {} parts)",
        outcome.file.id, outcome.file.size, outcome.file.total_parts
    );
    Ok(Json(PostFilesResponse {
        file_id: outcome.file.id,
        size: outcome.file.size,
        parts: outcome.file.total_parts,
    })
    .into_response())
}

#[instrument(skip(state))]
async fn get_file<C: StorageClient + 'static>(
    State(state): State<AppState<C>>,
    Path(id): Path<String>,
) -> Result<Response, BlobError> {
    // Check existence and completeness before committing to a 200 — once
    // the body stream starts, headers are already on the wire.
    let file = state.service.meta.get(&id).await?;
    for index in 0..file.total_parts {
        if !file.parts.contains_key(&index) {
            return Err(BlobError::Incomplete { index });
        }
    }

    let (writer, reader) = tokio::io::duplex(64 * 1024);
    let service = state.service.clone();
    tokio::spawn(async move {
        if let Err(e) = service.stream(&id, writer).await {
            tracing::warn!("stream of {} failed mid-transfer: {}", id, e);
        }
    });

    // Content-Length isn't set here: the record's declared size can't be
    // guaranteed once streaming starts (a node can still fail mid-transfer),
    // and promising a length we then fail to deliver is a worse protocol
    // violation than falling back to chunked encoding.
    let body = Body::from_stream(tokio_util::io::ReaderStream::new(reader));
    let mut headers = HeaderMap::new();
    headers.insert(
        "content-type",
        axum::http::HeaderValue::from_static("application/octet-stream"),
    );
    Ok((StatusCode::OK, headers, body).into_response())
}

#[derive(Deserialize)]
struct AddStoragesRequest {
    storages: Vec<String>,
}

#[instrument(skip(state))]
async fn add_storages<C: StorageClient + 'static>(
    State(state): State<AppState<C>>,
    body: axum::body::Bytes,
) -> Result<StatusCode, BlobError> {
    let payload: AddStoragesRequest = serde_json::from_slice(&body)
        .map_err(|e| BlobError::BadRequest(format!("invalid JSON: {e}")))?;
    if payload.storages.is_empty() {
        return Err(BlobError::BadRequest("storages list is empty".to_string()));
    }
    state.service.router.add(&payload.storages);
    Ok(StatusCode::NO_CONTENT)
}

async fn get_config<C>(State(state): State<AppState<C>>) -> Json<Config> {
    Json((*state.config).clone())
}
