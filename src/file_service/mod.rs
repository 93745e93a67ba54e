//! Plans chunking, fans out uploads, and reassembles downloads in order.

mod stream;
mod upload;

pub use stream::stream_file;
pub use upload::{upload_file, UploadOutcome};

use std::sync::Arc;

use crate::meta::MetaStore;
use crate::router::Router;
use crate::storage_client::StorageClient;

/// Shared dependencies for the upload and stream pipelines.
pub struct FileService<C> {
    pub router: Arc<Router>,
    pub storage: Arc<C>,
    pub meta: Arc<dyn MetaStore>,
    pub desired_parts: usize,
}

impl<C: StorageClient + 'static> FileService<C> {
    pub fn new(
        router: Arc<Router>,
        storage: Arc<C>,
        meta: Arc<dyn MetaStore>,
        desired_parts: usize,
    ) -> Self {
        Self {
            router,
            storage,
            meta,
            desired_parts,
        }
    }
}
