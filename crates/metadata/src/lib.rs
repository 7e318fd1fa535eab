//! Durable metadata persistence for SatoshiSend.
//!
//! One row per blob (`files`), one row per unsettled invoice
//! (`pending_invoices`). The store is the single source of truth for blob
//! state transitions; every multi-column transition is a single statement.

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use models::{FileMeta, PendingInvoice, StoreStats};
pub use repos::{FileRepo, InvoiceRepo};
pub use store::{MetaStore, SqliteStore};

use satoshisend_core::config::MetadataConfig;
use std::sync::Arc;

/// Create a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetaStore>> {
    let store = SqliteStore::new(&config.path).await?;
    Ok(Arc::new(store))
}
