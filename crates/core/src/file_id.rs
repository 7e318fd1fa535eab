//! File identifier grammar and generation.
//!
//! A file id is an opaque 128-bit random value, hex-encoded to 32 characters.
//! The accepted grammar is wider than what we generate (`^[A-Za-z0-9]{1,64}$`)
//! so that ids survive copy/paste normalization by clients. Anything outside
//! the grammar is rejected before it can reach a storage or metadata backend.

use crate::error::{Error, Result};
use rand::RngCore;

/// Maximum accepted id length in characters.
pub const MAX_ID_LEN: usize = 64;

/// Number of random bytes in a generated id (hex-encodes to 32 chars).
const ID_BYTES: usize = 16;

/// A validated file identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FileId(String);

impl FileId {
    /// Generate a fresh random id from the OS-seeded CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; ID_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Parse and validate an id against the grammar.
    pub fn parse(s: &str) -> Result<Self> {
        validate_id(s)?;
        Ok(Self(s.to_string()))
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A short prefix for log lines and invoice memos.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validate a raw id string against `^[A-Za-z0-9]{1,64}$`.
pub fn validate_id(s: &str) -> Result<()> {
    if s.is_empty() {
        return Err(Error::InvalidFileId("empty".to_string()));
    }
    if s.len() > MAX_ID_LEN {
        return Err(Error::InvalidFileId(format!(
            "length {} exceeds maximum {}",
            s.len(),
            MAX_ID_LEN
        )));
    }
    if !s.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(Error::InvalidFileId(format!(
            "contains non-alphanumeric characters: {s:?}"
        )));
    }
    Ok(())
}
