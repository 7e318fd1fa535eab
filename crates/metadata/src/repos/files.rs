//! Blob metadata repository.

use crate::error::MetadataResult;
use crate::models::{FileMeta, StoreStats};
use async_trait::async_trait;

/// Repository for blob metadata rows.
#[async_trait]
pub trait FileRepo: Send + Sync {
    /// Insert a new metadata row. Fails with `AlreadyExists` on id collision.
    async fn save_file_meta(&self, meta: &FileMeta) -> MetadataResult<()>;

    /// Get a metadata row by id.
    async fn get_file_meta(&self, id: &str) -> MetadataResult<Option<FileMeta>>;

    /// Atomically set `paid = true` and extend `expires_at` to now plus the
    /// row's own `host_duration`. Single statement; returns `NotFound` when
    /// no row was updated (unknown id, or the janitor won the race).
    async fn mark_paid(&self, id: &str) -> MetadataResult<()>;

    /// Delete a metadata row. Returns `NotFound` when the row was absent.
    async fn delete_file_meta(&self, id: &str) -> MetadataResult<()>;

    /// All rows whose `expires_at` has passed at call time.
    async fn list_expired_files(&self) -> MetadataResult<Vec<FileMeta>>;

    /// Aggregate counts and byte totals. Not transactional.
    async fn get_stats(&self) -> MetadataResult<StoreStats>;
}
