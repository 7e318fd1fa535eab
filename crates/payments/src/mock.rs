//! Mock wallet for development and tests.

use crate::error::{PaymentError, PaymentResult};
use crate::wallet::{Invoice, SettlementEvent, WalletAdapter, SETTLEMENT_CHANNEL_CAPACITY};
use async_trait::async_trait;
use rand::RngCore;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

/// A wallet that mints fake invoices and self-settles each one after a fixed
/// delay. No network, no signatures.
pub struct MockWallet {
    settle_delay: Duration,
    tx: mpsc::Sender<SettlementEvent>,
    rx: Mutex<Option<mpsc::Receiver<SettlementEvent>>>,
}

impl MockWallet {
    /// Create a mock wallet that settles invoices `settle_delay` after mint.
    pub fn new(settle_delay: Duration) -> Self {
        let (tx, rx) = mpsc::channel(SETTLEMENT_CHANNEL_CAPACITY);
        Self {
            settle_delay,
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Settle an invoice immediately. Lets tests drive settlement without
    /// waiting out the timer.
    pub fn settle(&self, payment_hash: &str) {
        let event = SettlementEvent {
            payment_hash: payment_hash.to_string(),
        };
        if self.tx.try_send(event).is_err() {
            tracing::warn!(payment_hash = %payment_hash, "mock settlement dropped");
        }
    }
}

fn generate_payment_hash() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[async_trait]
impl WalletAdapter for MockWallet {
    async fn create_invoice(&self, amount_sats: i64, _memo: &str) -> PaymentResult<Invoice> {
        let hash = generate_payment_hash();
        let invoice = Invoice {
            payment_hash: hash.clone(),
            // Fake BOLT11
            payment_request: format!("lnbc{}", &hash[..20]),
            amount_sats,
        };

        let tx = self.tx.clone();
        let delay = self.settle_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tracing::info!(payment_hash = %&hash[..8], "mock wallet auto-settling invoice");
            if tx.send(SettlementEvent { payment_hash: hash }).await.is_err() {
                // Consumer shut down; nothing to settle against.
            }
        });

        Ok(invoice)
    }

    fn settlement_stream(&self) -> PaymentResult<mpsc::Receiver<SettlementEvent>> {
        self.rx
            .lock()
            .expect("mock wallet receiver lock poisoned")
            .take()
            .ok_or(PaymentError::StreamTaken)
    }
}
