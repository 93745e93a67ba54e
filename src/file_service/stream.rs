//! Download pipeline: fetch parts in parallel with bounded concurrency,
//! write them to the sink in strict index order.

use std::sync::Arc;

use futures::TryStreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Semaphore;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

use crate::errors::BlobError;
use crate::storage_client::StorageClient;

use super::FileService;

impl<C: StorageClient + 'static> FileService<C> {
    /// Loads the file record for `file_id` and writes its reassembled
    /// bytes to `sink`, in ascending part-index order.
    pub async fn stream<W>(&self, file_id: &str, mut sink: W) -> Result<(), BlobError>
    where
        W: AsyncWrite + Unpin,
    {
        let file = self.meta.get(file_id).await?;
        if file.total_parts == 0 {
            return Ok(());
        }
        for index in 0..file.total_parts {
            if !file.parts.contains_key(&index) {
                return Err(BlobError::Incomplete { index });
            }
        }

        let cancel = CancellationToken::new();
        let semaphore = Arc::new(Semaphore::new(file.total_parts));
        let mut workers = tokio::task::JoinSet::new();
        let mut readers = Vec::with_capacity(file.total_parts);

        for index in 0..file.total_parts {
            let base_url = file.parts[&index].storage.clone();
            let (writer, reader) = tokio::io::duplex(64 * 1024);
            readers.push(Some(reader));

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| BlobError::Internal(format!("semaphore closed: {e}")))?;
            let storage = self.storage.clone();
            let file_id = file_id.to_string();
            let cancel_for_worker = cancel.clone();
            let cancel_for_get = cancel.clone();
            workers.spawn(async move {
                let _permit = permit;
                let result =
                    copy_part(&*storage, &base_url, &file_id, index, writer, cancel_for_get)
                        .await;
                if result.is_err() {
                    cancel_for_worker.cancel();
                }
                result
            });
        }

        let mut copy_err: Option<BlobError> = None;
        for reader_slot in readers.iter_mut() {
            let mut reader = reader_slot.take().expect("reader consumed once");
            let copy_result = tokio::select! {
                r = tokio::io::copy(&mut reader, &mut sink) => r,
                _ = cancel.cancelled() => {
                    Err(std::io::Error::new(std::io::ErrorKind::Other, "stream cancelled"))
                }
            };
            if let Err(e) = copy_result {
                cancel.cancel();
                copy_err = Some(BlobError::from(e));
                break;
            }
        }
        sink.flush().await.ok();

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    copy_err.get_or_insert(e);
                }
                Err(e) if !e.is_cancelled() => {
                    copy_err
                        .get_or_insert(BlobError::Internal(format!("stream worker panicked: {e}")));
                }
                Err(_) => {}
            }
        }

        match copy_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Streams `file_id`'s part `index` from `base_url` into `writer`.
async fn copy_part<C: StorageClient + ?Sized>(
    storage: &C,
    base_url: &str,
    file_id: &str,
    index: usize,
    mut writer: tokio::io::DuplexStream,
    cancel: CancellationToken,
) -> Result<(), BlobError> {
    let stream = storage.get_part(base_url, file_id, index, cancel).await?;
    let mut reader =
        StreamReader::new(stream.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string())));
    tokio::io::copy(&mut reader, &mut writer).await?;
    writer.shutdown().await?;
    Ok(())
}

/// Mirrors the original's top-level `StreamFile(ctx, svc, fileID, w)`
/// entry point.
pub async fn stream_file<C, W>(
    service: &FileService<C>,
    file_id: &str,
    sink: W,
) -> Result<(), BlobError>
where
    C: StorageClient + 'static,
    W: AsyncWrite + Unpin,
{
    service.stream(file_id, sink).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::MemoryStore;
    use crate::model::{File, Part};
    use crate::router::{HealthAdapter, Router};
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::{stream, Stream};
    use std::collections::BTreeMap;
    use tokio::io::AsyncRead;

    struct AllHealthy;
    #[async_trait]
    impl HealthAdapter for AllHealthy {
        async fn available(&self, candidates: &[String]) -> Vec<String> {
            candidates.to_vec()
        }
    }

    #[derive(Default)]
    struct FixedStorage {
        data: std::collections::HashMap<usize, Vec<u8>>,
    }

    #[async_trait]
    impl StorageClient for FixedStorage {
        async fn put_part<R>(
            &self,
            _base_url: &str,
            _req: crate::storage_client::PutPartRequest<R>,
        ) -> Result<(), BlobError>
        where
            R: AsyncRead + Send + Sync + 'static,
        {
            unimplemented!()
        }

        async fn get_part(
            &self,
            _base_url: &str,
            _file_id: &str,
            index: usize,
            _cancel: CancellationToken,
        ) -> Result<Box<dyn Stream<Item = Result<Bytes, BlobError>> + Send + Unpin>, BlobError>
        {
            let bytes = self.data.get(&index).cloned().unwrap_or_default();
            Ok(Box::new(Box::pin(stream::once(async move {
                Ok(Bytes::from(bytes))
            }))))
        }
    }

    fn service(storage: Arc<FixedStorage>) -> FileService<FixedStorage> {
        let router = Arc::new(Router::new(Box::new(AllHealthy)));
        router.set(vec!["http://node0".into()]);
        FileService::new(router, storage, Arc::new(MemoryStore::new()), 6)
    }

    fn file_with_parts(parts: Vec<(usize, u64)>, total: usize) -> File {
        let mut map = BTreeMap::new();
        for (i, size) in parts {
            map.insert(
                i,
                Part {
                    index: i,
                    size,
                    digest: "a".repeat(64),
                    storage: "http://node0".into(),
                },
            );
        }
        File {
            id: "f1".into(),
            name: None,
            size: map.values().map(|p| p.size).sum(),
            total_parts: total,
            parts: map,
        }
    }

    #[tokio::test]
    async fn streams_parts_in_order() {
        let data = std::collections::HashMap::from([
            (0, b"hello ".to_vec()),
            (1, b"world".to_vec()),
        ]);
        let storage = Arc::new(FixedStorage { data });
        let svc = service(storage);
        svc.meta
            .save(&file_with_parts(vec![(0, 6), (1, 5)], 2))
            .await
            .unwrap();

        let mut out = Vec::new();
        svc.stream("f1", &mut out).await.unwrap();
        assert_eq!(out, b"hello world");
    }

    #[tokio::test]
    async fn missing_part_is_incomplete() {
        let storage = Arc::new(FixedStorage::default());
        let svc = service(storage);
        svc.meta
            .save(&file_with_parts(vec![(0, 6)], 2))
            .await
            .unwrap();

        let mut out = Vec::new();
        let err = svc.stream("f1", &mut out).await.unwrap_err();
        assert!(matches!(err, BlobError::Incomplete { index: 1 }));
    }

    #[tokio::test]
    async fn unknown_file_is_not_found() {
        let storage = Arc::new(FixedStorage::default());
        let svc = service(storage);
        let mut out = Vec::new();
        let err = svc.stream("missing", &mut out).await.unwrap_err();
        assert!(matches!(err, BlobError::NotFound));
    }
}
