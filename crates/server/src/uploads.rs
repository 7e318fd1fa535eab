//! Upload coordination: the reserve / stream / finalize protocol.

use crate::error::{ApiError, ApiResult};
use bytes::Bytes;
use satoshisend_core::FileId;
use satoshisend_core::config::LimitConfig;
use satoshisend_metadata::{FileMeta, MetaStore};
use satoshisend_storage::{BlobStore, StorageError};
use std::sync::Arc;
use time::OffsetDateTime;

/// Result of a finalized upload.
#[derive(Clone, Debug)]
pub struct UploadResult {
    pub file_id: FileId,
    pub size: i64,
}

/// Runs the three-step upload protocol against the blob and metadata stores.
pub struct UploadCoordinator {
    storage: Arc<dyn BlobStore>,
    metadata: Arc<dyn MetaStore>,
    limits: LimitConfig,
}

impl UploadCoordinator {
    /// Create a new upload coordinator.
    pub fn new(
        storage: Arc<dyn BlobStore>,
        metadata: Arc<dyn MetaStore>,
        limits: LimitConfig,
    ) -> Self {
        Self {
            storage,
            metadata,
            limits,
        }
    }

    /// Reserve an identifier for a new upload. Touches neither storage nor
    /// metadata; the id only becomes visible state once bytes arrive.
    pub fn reserve(&self) -> FileId {
        FileId::generate()
    }

    /// Store blob bytes under a reserved id, retrying transient backend
    /// failures with a doubling delay. Any partial object is deleted between
    /// attempts and after the final failure.
    pub async fn store_blob(&self, id: &FileId, data: Bytes) -> ApiResult<u64> {
        let mut delay = self.limits.initial_retry_delay();
        let mut last_err = None;

        for attempt in 1..=self.limits.max_save_retries {
            match self.storage.save(id.as_str(), data.clone(), None).await {
                Ok(size) => {
                    if attempt > 1 {
                        tracing::info!(file_id = %id, attempt, "blob store write succeeded after retry");
                    }
                    return Ok(size);
                }
                Err(e) => {
                    tracing::warn!(
                        file_id = %id,
                        attempt,
                        max_attempts = self.limits.max_save_retries,
                        error = %e,
                        "blob store write failed"
                    );
                    self.delete_partial(id).await;
                    last_err = Some(e);

                    if attempt < self.limits.max_save_retries {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }

        Err(last_err
            .map(ApiError::from)
            .unwrap_or_else(|| ApiError::Internal("blob store write failed".to_string())))
    }

    /// Finalize an upload: verify the blob landed, then create the pending
    /// metadata row with the short unpaid lifetime.
    ///
    /// A declared/actual size mismatch is logged but not fatal: client-side
    /// encryption may legitimately alter the byte count relative to the
    /// client's estimate. After the row insert succeeds the blob is never
    /// deleted here; expiry is the janitor's job.
    pub async fn finalize(
        &self,
        id: &FileId,
        declared_size: i64,
        host_duration: time::Duration,
    ) -> ApiResult<UploadResult> {
        let actual_size = match self.storage.stat(id.as_str()).await {
            Ok(size) => size as i64,
            Err(StorageError::NotFound(_)) => {
                return Err(ApiError::NotFound(
                    "file not found in storage - upload may have failed".to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        };

        if declared_size > 0 && declared_size != actual_size {
            tracing::warn!(
                file_id = %id,
                declared_size,
                actual_size,
                "size mismatch between declared and stored bytes"
            );
        }

        let now = OffsetDateTime::now_utc();
        let meta = FileMeta {
            id: id.to_string(),
            size: actual_size,
            expires_at: now + time::Duration::seconds(self.limits.pending_timeout_secs as i64),
            host_duration,
            paid: false,
            created_at: now,
        };

        self.metadata.save_file_meta(&meta).await?;

        Ok(UploadResult {
            file_id: id.clone(),
            size: actual_size,
        })
    }

    async fn delete_partial(&self, id: &FileId) {
        match self.storage.delete(id.as_str()).await {
            Ok(()) | Err(StorageError::NotFound(_)) => {}
            Err(e) => {
                tracing::warn!(file_id = %id, error = %e, "failed to delete partial blob");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use satoshisend_metadata::{FileRepo, MetadataError, SqliteStore};
    use satoshisend_storage::{ByteStream, ProgressFn, StorageResult};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// Blob store that fails the first `failures` save attempts.
    #[derive(Default)]
    struct FlakyStore {
        failures: usize,
        saves: AtomicUsize,
        deletes: AtomicUsize,
        blobs: Mutex<HashMap<String, Bytes>>,
    }

    impl FlakyStore {
        fn failing(failures: usize) -> Self {
            Self {
                failures,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl BlobStore for FlakyStore {
        async fn save(
            &self,
            id: &str,
            data: Bytes,
            _on_progress: Option<ProgressFn>,
        ) -> StorageResult<u64> {
            let attempt = self.saves.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.failures {
                return Err(StorageError::Io(std::io::Error::other("injected failure")));
            }
            let size = data.len() as u64;
            self.blobs.lock().unwrap().insert(id.to_string(), data);
            Ok(size)
        }

        async fn load(&self, id: &str) -> StorageResult<ByteStream> {
            let data = self
                .blobs
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
            Ok(Box::pin(futures::stream::once(async move { Ok(data) })))
        }

        async fn load_range(&self, id: &str, start: u64, end: u64) -> StorageResult<Bytes> {
            let data = self
                .blobs
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
            Ok(data.slice(start as usize..end as usize))
        }

        async fn stat(&self, id: &str) -> StorageResult<u64> {
            self.blobs
                .lock()
                .unwrap()
                .get(id)
                .map(|d| d.len() as u64)
                .ok_or_else(|| StorageError::NotFound(id.to_string()))
        }

        async fn delete(&self, id: &str) -> StorageResult<()> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            self.blobs
                .lock()
                .unwrap()
                .remove(id)
                .map(|_| ())
                .ok_or_else(|| StorageError::NotFound(id.to_string()))
        }

        fn public_url(&self, _id: &str) -> Option<String> {
            None
        }

        fn supports_ranges(&self) -> bool {
            true
        }

        fn backend_name(&self) -> &'static str {
            "flaky"
        }
    }

    fn fast_limits() -> LimitConfig {
        LimitConfig {
            initial_retry_delay_ms: 5,
            ..Default::default()
        }
    }

    async fn coordinator(
        store: Arc<FlakyStore>,
    ) -> (tempfile::TempDir, Arc<SqliteStore>, UploadCoordinator) {
        let temp = tempdir().unwrap();
        let metadata = Arc::new(
            SqliteStore::new(temp.path().join("metadata.db"))
                .await
                .unwrap(),
        );
        let coordinator = UploadCoordinator::new(store, metadata.clone(), fast_limits());
        (temp, metadata, coordinator)
    }

    #[tokio::test]
    async fn reserve_generates_valid_unique_ids() {
        let store = Arc::new(FlakyStore::failing(0));
        let (_temp, _meta, coordinator) = coordinator(store).await;

        let a = coordinator.reserve();
        let b = coordinator.reserve();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[tokio::test]
    async fn store_blob_succeeds_on_third_attempt() {
        let store = Arc::new(FlakyStore::failing(2));
        let (_temp, metadata, coordinator) = coordinator(store.clone()).await;

        let id = coordinator.reserve();
        let data = Bytes::from(vec![9u8; 4096]);
        let size = coordinator.store_blob(&id, data).await.unwrap();

        assert_eq!(size, 4096);
        assert_eq!(store.saves.load(Ordering::SeqCst), 3);
        // Partial cleanup ran after each failed attempt.
        assert_eq!(store.deletes.load(Ordering::SeqCst), 2);

        // Finalize after retry-success creates exactly one row with the
        // stored byte count.
        let result = coordinator
            .finalize(&id, 4096, time::Duration::days(7))
            .await
            .unwrap();
        assert_eq!(result.size, 4096);
        let meta = metadata.get_file_meta(id.as_str()).await.unwrap().unwrap();
        assert_eq!(meta.size, 4096);
        assert!(!meta.paid);
    }

    #[tokio::test]
    async fn store_blob_gives_up_after_max_retries() {
        let store = Arc::new(FlakyStore::failing(usize::MAX));
        let (_temp, _meta, coordinator) = coordinator(store.clone()).await;

        let id = coordinator.reserve();
        let result = coordinator.store_blob(&id, Bytes::from_static(b"x")).await;

        assert!(result.is_err());
        assert_eq!(store.saves.load(Ordering::SeqCst), 3);
        assert!(store.blobs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn finalize_without_blob_reports_upload_failure() {
        let store = Arc::new(FlakyStore::failing(0));
        let (_temp, _meta, coordinator) = coordinator(store).await;

        let id = coordinator.reserve();
        match coordinator.finalize(&id, 100, time::Duration::days(7)).await {
            Err(ApiError::NotFound(msg)) => assert!(msg.contains("upload may have failed")),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn finalize_tolerates_size_mismatch() {
        let store = Arc::new(FlakyStore::failing(0));
        let (_temp, _meta, coordinator) = coordinator(store).await;

        let id = coordinator.reserve();
        coordinator
            .store_blob(&id, Bytes::from(vec![1u8; 128]))
            .await
            .unwrap();

        // Ciphertext expansion: declared size differs from stored size.
        let result = coordinator
            .finalize(&id, 100, time::Duration::days(7))
            .await
            .unwrap();
        assert_eq!(result.size, 128);
    }

    #[tokio::test]
    async fn concurrent_finalize_serialises_on_the_insert() {
        let store = Arc::new(FlakyStore::failing(0));
        let (_temp, _meta, coordinator) = coordinator(store).await;

        let id = coordinator.reserve();
        coordinator
            .store_blob(&id, Bytes::from_static(b"data"))
            .await
            .unwrap();

        coordinator
            .finalize(&id, 4, time::Duration::days(7))
            .await
            .unwrap();
        match coordinator.finalize(&id, 4, time::Duration::days(7)).await {
            Err(ApiError::Metadata(MetadataError::AlreadyExists(_))) => {}
            other => panic!("expected AlreadyExists, got {other:?}"),
        }
    }
}
