//! In-memory meta store; the default backing for tests and for `front`
//! when no DSN is configured.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::MetaStore;
use crate::errors::BlobError;
use crate::model::File;

#[derive(Default)]
pub struct MemoryStore {
    files: RwLock<HashMap<String, File>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetaStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<File, BlobError> {
        self.files
            .read()
            .get(id)
            .cloned()
            .ok_or(BlobError::NotFound)
    }

    async fn save(&self, file: &File) -> Result<(), BlobError> {
        self.files.write().insert(file.id.clone(), file.clone());
        Ok(())
    }
}
