//! Payment coordinator: owns the invoice ↔ blob mapping and drives
//! settlement into durable metadata state.
//!
//! Settlement delivery is at-least-once at the wallet layer. Effects here are
//! at-most-once: the map entry is removed under lock before any I/O, so a
//! duplicate delivery finds nothing and is dropped.

use crate::error::PaymentResult;
use crate::wallet::{Invoice, SettlementEvent, WalletAdapter};
use satoshisend_metadata::{MetaStore, PendingInvoice};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Callback invoked with the file id after a settlement lands.
pub type PaymentCallback = Arc<dyn Fn(&str) + Send + Sync>;

struct TrackedInvoice {
    file_id: String,
    invoice: Invoice,
}

#[derive(Default)]
struct Tables {
    /// payment_hash → tracked invoice.
    by_hash: HashMap<String, TrackedInvoice>,
    /// file_id → payment_hash. Inverse of `by_hash` at all quiescent points.
    by_file: HashMap<String, String>,
}

/// Coordinates invoices with blob metadata state.
pub struct PaymentCoordinator {
    wallet: Arc<dyn WalletAdapter>,
    metadata: Arc<dyn MetaStore>,
    tables: Mutex<Tables>,
    on_payment: Mutex<Option<PaymentCallback>>,
}

impl PaymentCoordinator {
    /// Create a new coordinator.
    pub fn new(wallet: Arc<dyn WalletAdapter>, metadata: Arc<dyn MetaStore>) -> Self {
        Self {
            wallet,
            metadata,
            tables: Mutex::new(Tables::default()),
            on_payment: Mutex::new(None),
        }
    }

    /// Mint an invoice for a blob and persist the pending row.
    ///
    /// The in-memory maps are updated first and rolled back if the durable
    /// write fails, so the maps never reference an invoice the store has
    /// definitively refused.
    pub async fn mint_invoice_for(
        &self,
        file_id: &str,
        amount_sats: i64,
    ) -> PaymentResult<Invoice> {
        let memo = format!(
            "SatoshiSend file hosting: {}",
            &file_id[..file_id.len().min(8)]
        );
        let invoice = self.wallet.create_invoice(amount_sats, &memo).await?;

        {
            let mut tables = self.lock_tables();
            tables.by_hash.insert(
                invoice.payment_hash.clone(),
                TrackedInvoice {
                    file_id: file_id.to_string(),
                    invoice: invoice.clone(),
                },
            );
            tables
                .by_file
                .insert(file_id.to_string(), invoice.payment_hash.clone());
        }

        let row = PendingInvoice {
            payment_hash: invoice.payment_hash.clone(),
            file_id: file_id.to_string(),
            payment_request: invoice.payment_request.clone(),
            amount_sats,
            created_at: OffsetDateTime::now_utc(),
        };

        if let Err(e) = self.metadata.save_pending_invoice(&row).await {
            let mut tables = self.lock_tables();
            tables.by_hash.remove(&invoice.payment_hash);
            tables.by_file.remove(file_id);
            return Err(e.into());
        }

        Ok(invoice)
    }

    /// Get the pending invoice for a blob, if any.
    pub fn get_invoice_for(&self, file_id: &str) -> Option<Invoice> {
        let tables = self.lock_tables();
        let hash = tables.by_file.get(file_id)?;
        tables.by_hash.get(hash).map(|t| t.invoice.clone())
    }

    /// Number of invoices currently awaiting settlement.
    pub fn tracked_invoices(&self) -> usize {
        self.lock_tables().by_hash.len()
    }

    /// Set the settlement callback. Replaces any previous callback.
    pub fn set_callback(&self, callback: PaymentCallback) {
        *self
            .on_payment
            .lock()
            .expect("payment callback lock poisoned") = Some(callback);
    }

    /// Rebuild the maps from the pending_invoices table.
    ///
    /// Must complete before the settlement consumer starts, so an early
    /// delivery can find its target.
    pub async fn load_on_startup(&self) -> PaymentResult<()> {
        let rows = self.metadata.list_pending_invoices().await?;
        let count = rows.len();

        let mut tables = self.lock_tables();
        for row in rows {
            tables
                .by_file
                .insert(row.file_id.clone(), row.payment_hash.clone());
            tables.by_hash.insert(
                row.payment_hash.clone(),
                TrackedInvoice {
                    file_id: row.file_id,
                    invoice: Invoice {
                        payment_hash: row.payment_hash,
                        payment_request: row.payment_request,
                        amount_sats: row.amount_sats,
                    },
                },
            );
        }

        if count > 0 {
            tracing::info!(count, "recovered pending invoices from store");
        }
        Ok(())
    }

    /// Consume settlement events until the channel closes or shutdown fires.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<SettlementEvent>,
        cancel: CancellationToken,
    ) {
        tracing::info!("settlement consumer started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("settlement consumer shutting down");
                    break;
                }
                maybe = events.recv() => match maybe {
                    Some(event) => self.handle_settlement(&event.payment_hash).await,
                    None => {
                        tracing::info!("settlement channel closed");
                        break;
                    }
                },
            }
        }
    }

    async fn handle_settlement(&self, payment_hash: &str) {
        // Critical section: claim the invoice or drop the event. No I/O here.
        let file_id = {
            let mut tables = self.lock_tables();
            let Some(tracked) = tables.by_hash.remove(payment_hash) else {
                // Unknown, late, or duplicate delivery.
                tracing::debug!(payment_hash = %payment_hash, "dropping unknown settlement");
                return;
            };
            tables.by_file.remove(&tracked.file_id);
            tracked.file_id
        };
        let callback = self
            .on_payment
            .lock()
            .expect("payment callback lock poisoned")
            .clone();

        if let Err(e) = self.metadata.mark_paid(&file_id).await {
            // The wallet retries delivery and restart recovery replays from
            // pending_invoices, so no local retry here.
            tracing::error!(
                file_id = %file_id,
                error = %e,
                "CRITICAL: failed to mark file paid after settlement"
            );
        }

        if let Err(e) = self.metadata.delete_pending_invoice(payment_hash).await {
            tracing::warn!(
                payment_hash = %payment_hash,
                error = %e,
                "failed to delete settled invoice row"
            );
        }

        if let Some(cb) = callback {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| cb(&file_id)));
            if result.is_err() {
                tracing::error!(file_id = %file_id, "payment callback panicked");
            }
        }
    }

    fn lock_tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().expect("payment tables lock poisoned")
    }
}

impl std::fmt::Debug for PaymentCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentCoordinator")
            .field("tracked_invoices", &self.tracked_invoices())
            .finish_non_exhaustive()
    }
}
