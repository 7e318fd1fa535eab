//! Wallet adapter trait and invoice types.

use crate::error::PaymentResult;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Bound on the settlement channel. Overflowing events are dropped: the
/// wallet retries unacknowledged webhooks and restart recovery recomputes the
/// pending set from durable state, so the channel must never grow unboundedly.
pub const SETTLEMENT_CHANNEL_CAPACITY: usize = 1000;

/// A Lightning Network invoice.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invoice {
    /// Opaque payment hash identifying the invoice.
    pub payment_hash: String,
    /// BOLT11-encoded payment request.
    pub payment_request: String,
    /// Invoice amount in satoshis.
    pub amount_sats: i64,
}

/// A settled-invoice notification. Unsettled updates never reach the channel.
#[derive(Clone, Debug)]
pub struct SettlementEvent {
    /// Payment hash of the settled invoice.
    pub payment_hash: String,
}

/// Narrow interface over a Lightning wallet.
#[async_trait]
pub trait WalletAdapter: Send + Sync {
    /// Mint an invoice for `amount_sats` with a human-readable memo.
    async fn create_invoice(&self, amount_sats: i64, memo: &str) -> PaymentResult<Invoice>;

    /// Take the settlement event receiver. The channel is long-lived and has
    /// exactly one consumer; a second call returns `StreamTaken`. The channel
    /// closes when the adapter shuts down.
    fn settlement_stream(&self) -> PaymentResult<mpsc::Receiver<SettlementEvent>>;
}
