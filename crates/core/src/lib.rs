//! Core domain types for SatoshiSend.
//!
//! This crate holds what every other crate needs and nothing more:
//! - File identifier grammar, validation, and generation
//! - Hosting price calculation
//! - Application configuration
//! - Core error type

pub mod config;
pub mod error;
pub mod file_id;
pub mod pricing;

pub use error::{Error, Result};
pub use file_id::FileId;
