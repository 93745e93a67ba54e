//! Canonical error taxonomy, mapped to HTTP status codes at the boundary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Errors produced anywhere in the core (router, file service, storage
/// node). Boundary handlers map these to HTTP responses via
/// [`IntoResponse`]; nothing below the HTTP layer knows about status
/// codes.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("file not found")]
    NotFound,

    #[error("file incomplete: missing part {index}")]
    Incomplete { index: usize },

    #[error("no storage ready")]
    NoStorage,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("size mismatch: declared {declared}, received {received}")]
    SizeMismatch { declared: u64, received: u64 },

    #[error("digest mismatch")]
    DigestMismatch,

    #[error("storage node error: {0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BlobError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            BlobError::NotFound => StatusCode::NOT_FOUND,
            BlobError::Incomplete { .. } => StatusCode::CONFLICT,
            BlobError::NoStorage => StatusCode::SERVICE_UNAVAILABLE,
            BlobError::BadRequest(_) => StatusCode::BAD_REQUEST,
            BlobError::SizeMismatch { .. } => StatusCode::BAD_REQUEST,
            BlobError::DigestMismatch => StatusCode::CONFLICT,
            BlobError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
            BlobError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            BlobError::NotFound => "NotFound",
            BlobError::Incomplete { .. } => "Incomplete",
            BlobError::NoStorage => "NoStorage",
            BlobError::BadRequest(_) => "BadRequest",
            BlobError::SizeMismatch { .. } => "SizeMismatch",
            BlobError::DigestMismatch => "DigestMismatch",
            BlobError::Upstream(_) => "Upstream",
            BlobError::Internal(_) => "Internal",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for BlobError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: self.code(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for BlobError {
    fn from(err: std::io::Error) -> Self {
        BlobError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for BlobError {
    fn from(err: serde_json::Error) -> Self {
        BlobError::Internal(err.to_string())
    }
}

impl From<reqwest::Error> for BlobError {
    fn from(err: reqwest::Error) -> Self {
        BlobError::Upstream(err.to_string())
    }
}
