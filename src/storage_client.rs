//! Wire client to the storage node: PUT/GET for a single part.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

use crate::errors::BlobError;

pub const HEADER_CHECKSUM: &str = "X-Checksum-Sha256";
pub const HEADER_TOTAL_PARTS: &str = "X-Total-Parts";
pub const HEADER_SIZE: &str = "X-Size";

/// A request to write one part to a storage node.
pub struct PutPartRequest<R> {
    pub file_id: String,
    pub index: usize,
    pub reader: R,
    pub size: u64,
    pub digest: Option<String>,
    pub total_parts: usize,
    /// Cancelled to abort the in-flight transfer; checked by the client
    /// implementation, never by the request body itself.
    pub cancel: CancellationToken,
}

/// Facade over the storage node's `/parts/{fileID}/{index}` surface.
#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn put_part<R>(&self, base_url: &str, req: PutPartRequest<R>) -> Result<(), BlobError>
    where
        R: AsyncRead + Send + Sync + 'static;

    async fn get_part(
        &self,
        base_url: &str,
        file_id: &str,
        index: usize,
        cancel: CancellationToken,
    ) -> Result<Box<dyn Stream<Item = Result<Bytes, BlobError>> + Send + Unpin>, BlobError>;
}

fn part_url(base: &str, file_id: &str, index: usize) -> String {
    format!("{}/parts/{}/{}", base.trim_end_matches('/'), file_id, index)
}

/// Default `reqwest`-backed storage client.
pub struct HttpStorageClient {
    client: reqwest::Client,
}

impl HttpStorageClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpStorageClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageClient for HttpStorageClient {
    async fn put_part<R>(&self, base_url: &str, req: PutPartRequest<R>) -> Result<(), BlobError>
    where
        R: AsyncRead + Send + Sync + 'static,
    {
        let url = part_url(base_url, &req.file_id, req.index);
        let stream = ReaderStream::new(req.reader);
        let body = reqwest::Body::wrap_stream(stream);

        let mut builder = self
            .client
            .put(&url)
            .header("Content-Length", req.size.to_string())
            .header(HEADER_TOTAL_PARTS, req.total_parts.to_string());
        if let Some(digest) = &req.digest {
            builder = builder.header(HEADER_CHECKSUM, digest);
        }

        let resp = tokio::select! {
            resp = builder.body(body).send() => resp?,
            _ = req.cancel.cancelled() => {
                return Err(BlobError::Upstream("cancelled".to_string()));
            }
        };
        if resp.status().as_u16() >= 300 {
            return Err(BlobError::Upstream(format!(
                "storage PUT failed: {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn get_part(
        &self,
        base_url: &str,
        file_id: &str,
        index: usize,
        cancel: CancellationToken,
    ) -> Result<Box<dyn Stream<Item = Result<Bytes, BlobError>> + Send + Unpin>, BlobError> {
        let url = part_url(base_url, file_id, index);
        let resp = tokio::select! {
            resp = self.client.get(&url).send() => resp?,
            _ = cancel.cancelled() => {
                return Err(BlobError::Upstream("cancelled".to_string()));
            }
        };
        if resp.status() != reqwest::StatusCode::OK {
            return Err(BlobError::Upstream(format!(
                "storage GET failed: {}",
                resp.status()
            )));
        }
        let stream = resp.bytes_stream();
        Ok(Box::new(Box::pin(futures::StreamExt::map(stream, |r| {
            r.map_err(BlobError::from)
        }))))
    }
}
