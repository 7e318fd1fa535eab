//! Pending invoice repository.

use crate::error::MetadataResult;
use crate::models::PendingInvoice;
use async_trait::async_trait;

/// Repository for unsettled invoice rows.
#[async_trait]
pub trait InvoiceRepo: Send + Sync {
    /// Upsert by payment hash. Settlement handling is idempotent, so
    /// replacing an existing row with the same hash is safe.
    async fn save_pending_invoice(&self, invoice: &PendingInvoice) -> MetadataResult<()>;

    /// Delete by payment hash. Idempotent: an absent row is not an error.
    async fn delete_pending_invoice(&self, payment_hash: &str) -> MetadataResult<()>;

    /// All pending invoice rows. Used at startup to rebuild coordinator state.
    async fn list_pending_invoices(&self) -> MetadataResult<Vec<PendingInvoice>>;
}
