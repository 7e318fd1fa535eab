//! Blob store trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

/// A boxed stream of bytes for streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Upload progress callback, called monotonically with
/// `(bytes_written_so_far, total)` where total is `-1` when unknown.
/// Callback failures are the callback's problem; backends never propagate them.
pub type ProgressFn = Arc<dyn Fn(u64, i64) + Send + Sync>;

/// Opaque blob storage keyed by file id.
///
/// Backends must reject ids outside `^[A-Za-z0-9]{1,64}$` with `InvalidId`
/// before touching any path or key. Save is not required to be atomic; on
/// failure a partial object may remain and the caller issues `delete`.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Store a blob. Returns the authoritative stored size in bytes.
    async fn save(
        &self,
        id: &str,
        data: Bytes,
        on_progress: Option<ProgressFn>,
    ) -> StorageResult<u64>;

    /// Open a blob for reading as a byte stream.
    async fn load(&self, id: &str) -> StorageResult<ByteStream>;

    /// Read the byte range `[start, end)` of a blob.
    async fn load_range(&self, id: &str, start: u64, end: u64) -> StorageResult<Bytes>;

    /// Get a blob's size without fetching content.
    async fn stat(&self, id: &str) -> StorageResult<u64>;

    /// Delete a blob. May return `NotFound` when the backend can tell the
    /// blob was absent; callers treat that as success.
    async fn delete(&self, id: &str) -> StorageResult<()>;

    /// Public URL for delegated retrieval, if the backend exposes one.
    fn public_url(&self, id: &str) -> Option<String>;

    /// Whether `load_range` is supported. Retrieval uses this to decide
    /// between byte-range responses and full-stream responses.
    fn supports_ranges(&self) -> bool;

    /// Static identifier for the backend type, for logging.
    fn backend_name(&self) -> &'static str;

    /// Verify backend connectivity at startup. The default is a no-op,
    /// suitable for backends with no remote dependency.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}
