//! Lightning payment handling for SatoshiSend.
//!
//! This crate covers the invoice lifecycle end to end:
//! - The [`WalletAdapter`] trait over a narrow invoice API
//! - A mock wallet that self-settles for development
//! - The Alby HTTP wallet with signed-webhook settlement ingestion
//! - The [`PaymentCoordinator`] that ties settlements to blob state

pub mod alby;
pub mod coordinator;
pub mod error;
pub mod mock;
pub mod wallet;

pub use alby::AlbyWallet;
pub use coordinator::{PaymentCallback, PaymentCoordinator};
pub use error::{PaymentError, PaymentResult};
pub use mock::MockWallet;
pub use wallet::{Invoice, SettlementEvent, WalletAdapter, SETTLEMENT_CHANNEL_CAPACITY};
