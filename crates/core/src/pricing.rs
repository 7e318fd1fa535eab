//! Hosting price calculation.

/// Minimum invoice amount in satoshis.
pub const MIN_PRICE_SATS: i64 = 100;

/// Bytes covered by one satoshi (1 MiB).
pub const BYTES_PER_SAT: i64 = 1024 * 1024;

/// Price in satoshis for hosting `size_bytes`: 1 sat per MiB, floor 100 sats.
pub fn price_sats(size_bytes: i64) -> i64 {
    (size_bytes / BYTES_PER_SAT).max(MIN_PRICE_SATS)
}
