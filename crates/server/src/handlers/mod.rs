//! HTTP request handlers.

pub mod files;
pub mod uploads;
pub mod webhook;

pub use files::{download, file_invoice, file_status};
pub use uploads::{complete_upload, init_upload, put_blob};
pub use webhook::alby_webhook;
