//! Periodic sweep of expired blobs and aged limiter entries.

use crate::limiter::PendingLimiter;
use satoshisend_metadata::{MetadataError, MetaStore};
use satoshisend_storage::{BlobStore, StorageError};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Counts from one janitor cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Blobs fully removed (bytes and row).
    pub files_deleted: usize,
    /// Items that failed and were left for a later cycle.
    pub errors: usize,
    /// Limiter entries removed.
    pub limiter_entries_removed: usize,
}

/// Background task that reclaims expired uploads.
pub struct Janitor {
    metadata: Arc<dyn MetaStore>,
    storage: Arc<dyn BlobStore>,
    limiter: Arc<PendingLimiter>,
    interval: Duration,
    pending_timeout: Duration,
}

impl Janitor {
    /// Create a new janitor.
    pub fn new(
        metadata: Arc<dyn MetaStore>,
        storage: Arc<dyn BlobStore>,
        limiter: Arc<PendingLimiter>,
        interval: Duration,
        pending_timeout: Duration,
    ) -> Self {
        Self {
            metadata,
            storage,
            limiter,
            interval,
            pending_timeout,
        }
    }

    /// Spawn the sweep loop. The task finishes any in-progress cycle and
    /// exits once `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so a restart loop
            // does not hammer the store.
            ticker.tick().await;

            tracing::info!(
                interval_secs = self.interval.as_secs(),
                "janitor started"
            );

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("janitor shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let stats = self.sweep().await;
                        if stats != SweepStats::default() {
                            tracing::info!(
                                files_deleted = stats.files_deleted,
                                errors = stats.errors,
                                limiter_entries_removed = stats.limiter_entries_removed,
                                "janitor cycle completed"
                            );
                        }
                    }
                }
            }
        })
    }

    /// Run one cycle: sweep expired blobs, then aged limiter entries.
    /// The sweeps are sequential and hold no lock across each other.
    pub async fn sweep(&self) -> SweepStats {
        let mut stats = self.sweep_expired_files().await;
        stats.limiter_entries_removed = self.limiter.sweep_older_than(self.pending_timeout);
        stats
    }

    /// Delete expired blobs: bytes first (absence tolerated), then the row.
    /// Individual failures are logged and counted; the sweep continues.
    async fn sweep_expired_files(&self) -> SweepStats {
        let mut stats = SweepStats::default();

        let expired = match self.metadata.list_expired_files().await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(error = %e, "janitor failed to list expired files");
                stats.errors += 1;
                return stats;
            }
        };

        for meta in expired {
            match self.storage.delete(&meta.id).await {
                Ok(()) | Err(StorageError::NotFound(_)) => {}
                Err(e) => {
                    tracing::warn!(file_id = %meta.id, error = %e, "janitor failed to delete blob");
                    stats.errors += 1;
                    continue;
                }
            }

            match self.metadata.delete_file_meta(&meta.id).await {
                Ok(()) | Err(MetadataError::NotFound(_)) => {
                    stats.files_deleted += 1;
                }
                Err(e) => {
                    tracing::warn!(file_id = %meta.id, error = %e, "janitor failed to delete metadata row");
                    stats.errors += 1;
                }
            }
        }

        stats
    }
}
