//! Local filesystem storage backend.

use crate::error::{StorageError, StorageResult};
use crate::traits::{BlobStore, ByteStream, ProgressFn};
use async_trait::async_trait;
use bytes::Bytes;
use satoshisend_core::file_id;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

/// Chunk size for streaming reads and progress-reporting writes (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Maximum range size for load_range operations (128 MiB).
/// This prevents large memory allocations from user-controlled range requests.
const MAX_RANGE_SIZE: u64 = 128 * 1024 * 1024;

/// Local filesystem blob store.
///
/// The id grammar (`^[A-Za-z0-9]{1,64}$`) is enforced before any path
/// construction, which also makes path traversal impossible: every accepted
/// id is a single plain path component.
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    /// Create a new filesystem backend rooted at `root`.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Get the path for an id, validating the grammar first.
    fn blob_path(&self, id: &str) -> StorageResult<PathBuf> {
        file_id::validate_id(id).map_err(|e| StorageError::InvalidId(e.to_string()))?;
        Ok(self.root.join(id))
    }
}

#[async_trait]
impl BlobStore for FilesystemBackend {
    #[instrument(skip(self, data, on_progress), fields(backend = "filesystem", size = data.len()))]
    async fn save(
        &self,
        id: &str,
        data: Bytes,
        on_progress: Option<ProgressFn>,
    ) -> StorageResult<u64> {
        let path = self.blob_path(id)?;
        let total = data.len() as u64;

        // Write to a uniquely named temp file, fsync, then rename. Concurrent
        // writers to the same id race on the rename, not on partial content.
        let temp_path = self.root.join(format!(".tmp.{}.{}", id, Uuid::new_v4()));
        let result: StorageResult<()> = async {
            let mut file = fs::File::create(&temp_path).await?;
            let mut written: u64 = 0;
            for chunk in data.chunks(STREAM_CHUNK_SIZE) {
                file.write_all(chunk).await?;
                written += chunk.len() as u64;
                if let Some(cb) = &on_progress {
                    cb(written, total as i64);
                }
            }
            file.sync_all().await?;
            fs::rename(&temp_path, &path).await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }

        Ok(total)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn load(&self, id: &str) -> StorageResult<ByteStream> {
        use tokio::io::AsyncReadExt;

        let path = self.blob_path(id)?;
        let file = fs::File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(id.to_string())
            } else {
                StorageError::Io(e)
            }
        })?;

        // Stream the file in chunks instead of loading entirely into memory
        let stream = async_stream::try_stream! {
            let mut file = file;
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        };

        Ok(Box::pin(stream))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn load_range(&self, id: &str, start: u64, end: u64) -> StorageResult<Bytes> {
        use tokio::io::{AsyncReadExt, AsyncSeekExt};

        if end < start {
            return Err(StorageError::InvalidRange(format!(
                "end ({end}) < start ({start})"
            )));
        }
        let range_size = end - start;
        if range_size > MAX_RANGE_SIZE {
            return Err(StorageError::InvalidRange(format!(
                "range size {range_size} exceeds maximum {MAX_RANGE_SIZE} bytes"
            )));
        }
        let len = usize::try_from(range_size).map_err(|_| {
            StorageError::InvalidRange(format!(
                "range size {range_size} exceeds platform address space"
            ))
        })?;

        let path = self.blob_path(id)?;
        let mut file = fs::File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(id.to_string())
            } else {
                StorageError::Io(e)
            }
        })?;

        file.seek(std::io::SeekFrom::Start(start)).await?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).await?;

        Ok(Bytes::from(buf))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn stat(&self, id: &str) -> StorageResult<u64> {
        let path = self.blob_path(id)?;
        let metadata = fs::metadata(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(id.to_string())
            } else {
                StorageError::Io(e)
            }
        })?;
        Ok(metadata.len())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, id: &str) -> StorageResult<()> {
        let path = self.blob_path(id)?;
        fs::remove_file(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(id.to_string())
            } else {
                StorageError::Io(e)
            }
        })
    }

    fn public_url(&self, _id: &str) -> Option<String> {
        None
    }

    fn supports_ranges(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}
