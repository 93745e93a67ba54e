//! Upload pipeline: plan chunks, allocate destinations, fan out N
//! concurrent part uploads with backpressure, commit the file record.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::errors::BlobError;
use crate::model::{plan_chunks, File, Part};
use crate::storage_client::{PutPartRequest, StorageClient};
use crate::tee::TeeWriter;

use super::FileService;

#[derive(Debug)]
pub struct UploadOutcome {
    pub file: File,
}

impl<C: StorageClient + 'static> FileService<C> {
    /// Streams `src` (exactly `size` bytes) into `plan.total` parts across
    /// the router's destinations, committing the file record on success.
    pub async fn upload<R>(
        &self,
        mut src: R,
        size: u64,
        name: Option<String>,
    ) -> Result<UploadOutcome, BlobError>
    where
        R: AsyncRead + Unpin,
    {
        let plan = plan_chunks(size, self.desired_parts);
        let destinations = self.router.allocate(plan.total).await?;

        let file_id = Uuid::new_v4().to_string();
        let parts: Arc<Mutex<BTreeMap<usize, Part>>> = Arc::new(Mutex::new(BTreeMap::new()));
        let semaphore = Arc::new(Semaphore::new(plan.total));
        let cancel = CancellationToken::new();
        let mut workers = tokio::task::JoinSet::new();

        let mut remaining = size;
        let mut upload_err: Option<BlobError> = None;

        for index in 0..plan.total {
            if cancel.is_cancelled() {
                break;
            }
            let part_size = plan.size.min(remaining);

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };
            let (writer, reader) = tokio::io::duplex(64 * 1024);

            let base_url = destinations[index].clone();
            let base_url_for_worker = base_url.clone();
            let storage = self.storage.clone();
            let file_id_for_worker = file_id.clone();
            let cancel_for_worker = cancel.clone();
            let cancel_for_put = cancel.clone();
            workers.spawn(async move {
                let _permit = permit;
                let result = storage
                    .put_part(
                        &base_url_for_worker,
                        PutPartRequest {
                            file_id: file_id_for_worker,
                            index,
                            reader,
                            size: part_size,
                            digest: None,
                            total_parts: plan.total,
                            cancel: cancel_for_put,
                        },
                    )
                    .await;
                if result.is_err() {
                    cancel_for_worker.cancel();
                }
                result
            });

            let mut tee = TeeWriter::new(writer);
            let mut limited_src = (&mut src).take(part_size);
            let copy_result = tokio::select! {
                r = tokio::io::copy(&mut limited_src, &mut tee) => r,
                _ = cancel.cancelled() => {
                    Err(std::io::Error::new(std::io::ErrorKind::Other, "upload cancelled"))
                }
            };
            let copied = match copy_result {
                Ok(n) => n,
                Err(e) => {
                    cancel.cancel();
                    upload_err = Some(BlobError::from(e));
                    break;
                }
            };
            let written = tee.written();
            let digest = tee.finish();

            if copied != part_size || written != part_size {
                cancel.cancel();
                upload_err = Some(BlobError::SizeMismatch {
                    declared: part_size,
                    received: copied,
                });
                break;
            }

            parts.lock().unwrap().insert(
                index,
                Part {
                    index,
                    size: part_size,
                    digest,
                    storage: base_url,
                },
            );
            remaining -= part_size;
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    upload_err.get_or_insert(e);
                }
                Err(e) => {
                    upload_err.get_or_insert(BlobError::Internal(format!(
                        "upload worker panicked: {e}"
                    )));
                }
            };
        }

        if let Some(e) = upload_err {
            return Err(e);
        }
        if remaining != 0 {
            return Err(BlobError::Internal(
                "chunk plan did not cover the declared size".to_string(),
            ));
        }

        let parts = parts.lock().unwrap().clone();

        let file = File {
            id: file_id,
            name,
            size,
            total_parts: plan.total,
            parts,
        };
        self.meta.save(&file).await?;
        Ok(UploadOutcome { file })
    }
}

/// Convenience free function mirroring the original's top-level
/// `UploadWhole(ctx, svc, src, size, name)` entry point.
pub async fn upload_file<C, R>(
    service: &FileService<C>,
    src: R,
    size: u64,
    name: Option<String>,
) -> Result<UploadOutcome, BlobError>
where
    C: StorageClient + 'static,
    R: AsyncRead + Unpin,
{
    service.upload(src, size, name).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::MemoryStore;
    use crate::router::{HealthAdapter, Router};
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::Stream;
    use std::collections::HashMap;
    use tokio::sync::Mutex as AsyncMutex;

    struct AllHealthy;
    #[async_trait]
    impl HealthAdapter for AllHealthy {
        async fn available(&self, candidates: &[String]) -> Vec<String> {
            candidates.to_vec()
        }
    }

    #[derive(Default)]
    struct RecordingStorage {
        received: AsyncMutex<HashMap<(String, usize), Vec<u8>>>,
    }

    #[async_trait]
    impl StorageClient for RecordingStorage {
        async fn put_part<R>(
            &self,
            _base_url: &str,
            req: PutPartRequest<R>,
        ) -> Result<(), BlobError>
        where
            R: AsyncRead + Send + Sync + 'static,
        {
            let mut buf = Vec::new();
            let mut reader = std::pin::pin!(req.reader);
            tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut buf).await?;
            self.received
                .lock()
                .await
                .insert((req.file_id, req.index), buf);
            Ok(())
        }

        async fn get_part(
            &self,
            _base_url: &str,
            _file_id: &str,
            _index: usize,
            _cancel: CancellationToken,
        ) -> Result<Box<dyn Stream<Item = Result<Bytes, BlobError>> + Send + Unpin>, BlobError>
        {
            unimplemented!()
        }
    }

    fn service(storage: Arc<RecordingStorage>) -> FileService<RecordingStorage> {
        let router = Arc::new(Router::new(Box::new(AllHealthy)));
        router.set(vec!["http://node0".into(), "http://node1".into()]);
        FileService::new(router, storage, Arc::new(MemoryStore::new()), 6)
    }

    #[tokio::test]
    async fn uploads_16kib_across_parts_and_commits_record() {
        let storage = Arc::new(RecordingStorage::default());
        let svc = service(storage.clone());

        let payload: Vec<u8> = b"0123456789abcdef".iter().cycle().take(16384).copied().collect();
        let outcome = svc
            .upload(std::io::Cursor::new(payload.clone()), 16384, Some("f.bin".into()))
            .await
            .unwrap();

        assert_eq!(outcome.file.size, 16384);
        assert_eq!(outcome.file.total_parts, 6);
        assert_eq!(outcome.file.parts.len(), 6);
        let summed: u64 = outcome.file.parts.values().map(|p| p.size).sum();
        assert_eq!(summed, 16384);

        let received = storage.received.lock().await;
        let mut reassembled = Vec::new();
        for i in 0..6 {
            reassembled.extend_from_slice(&received[&(outcome.file.id.clone(), i)]);
        }
        assert_eq!(reassembled, payload);

        let saved = svc.meta.get(&outcome.file.id).await.unwrap();
        assert_eq!(saved, outcome.file);
    }

    #[tokio::test]
    async fn empty_upload_is_one_zero_length_part() {
        let storage = Arc::new(RecordingStorage::default());
        let svc = service(storage);
        let outcome = svc
            .upload(std::io::Cursor::new(Vec::new()), 0, None)
            .await
            .unwrap();
        assert_eq!(outcome.file.total_parts, 1);
        assert_eq!(outcome.file.parts[&0].size, 0);
    }

    #[tokio::test]
    async fn short_body_fails_and_does_not_commit() {
        let storage = Arc::new(RecordingStorage::default());
        let svc = service(storage);
        let err = svc
            .upload(std::io::Cursor::new(vec![0u8; 10]), 100, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::SizeMismatch { .. }));
    }
}
