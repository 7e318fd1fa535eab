//! HTTP boundary and lifecycle engine for SatoshiSend.
//!
//! This crate ties the three asynchronous worlds together:
//! - Upload lifecycle: reserve / stream / finalize with bounded retries
//! - Invoice lifecycle: minting, webhook ingress, settlement propagation
//! - Retention: janitor sweeps and per-client pending-upload limits

pub mod error;
pub mod handlers;
pub mod janitor;
pub mod limiter;
pub mod ratelimit;
pub mod routes;
pub mod state;
pub mod uploads;

pub use error::{ApiError, ApiResult};
pub use janitor::Janitor;
pub use limiter::PendingLimiter;
pub use ratelimit::RateLimitState;
pub use routes::create_router;
pub use state::AppState;
pub use uploads::UploadCoordinator;
