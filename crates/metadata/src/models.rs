//! Row models for the metadata store.

use time::{Duration, OffsetDateTime};

/// Metadata for one uploaded blob.
///
/// While unpaid, `expires_at` is `created_at` + the pending timeout. Marking
/// the blob paid atomically rewrites `expires_at` to now + `host_duration`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileMeta {
    /// Opaque alphanumeric identifier.
    pub id: String,
    /// Blob size in bytes, as observed by the storage backend.
    pub size: i64,
    /// Instant after which the blob is sweepable.
    pub expires_at: OffsetDateTime,
    /// Hosting window applied once the invoice settles.
    pub host_duration: Duration,
    /// Whether the invoice has settled. Never reverts once set.
    pub paid: bool,
    /// Creation instant.
    pub created_at: OffsetDateTime,
}

impl FileMeta {
    /// True if the blob's lifetime has elapsed at `now`.
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now > self.expires_at
    }
}

/// One unsettled Lightning invoice.
///
/// `file_id` is not a foreign key: an invoice row may briefly outlive its
/// metadata row in restart-recovery windows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingInvoice {
    /// Opaque payment hash from the wallet. Primary key.
    pub payment_hash: String,
    /// The blob this invoice pays for.
    pub file_id: String,
    /// BOLT11 payment request string.
    pub payment_request: String,
    /// Invoice amount in satoshis.
    pub amount_sats: i64,
    /// Creation instant.
    pub created_at: OffsetDateTime,
}

/// Aggregate snapshot of stored blobs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub total_files: i64,
    pub paid_files: i64,
    pub pending_files: i64,
    pub expired_files: i64,
    pub total_bytes: i64,
    pub paid_bytes: i64,
    pub pending_bytes: i64,
}
