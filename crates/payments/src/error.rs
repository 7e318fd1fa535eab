//! Payment error types.

use thiserror::Error;

/// Payment operation errors.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("wallet error: {0}")]
    Wallet(String),

    #[error("wallet request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook verification failed: {0}")]
    Verification(String),

    #[error("webhook parse failed: {0}")]
    Parse(String),

    #[error("metadata error: {0}")]
    Metadata(#[from] satoshisend_metadata::MetadataError),

    #[error("settlement stream already taken")]
    StreamTaken,
}

/// Result type for payment operations.
pub type PaymentResult<T> = std::result::Result<T, PaymentError>;
