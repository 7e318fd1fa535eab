//! Application state shared across handlers.

use crate::limiter::PendingLimiter;
use crate::ratelimit::RateLimitState;
use crate::uploads::UploadCoordinator;
use satoshisend_core::config::AppConfig;
use satoshisend_metadata::MetaStore;
use satoshisend_payments::{AlbyWallet, PaymentCoordinator};
use satoshisend_storage::BlobStore;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Blob storage backend.
    pub storage: Arc<dyn BlobStore>,
    /// Metadata store.
    pub metadata: Arc<dyn MetaStore>,
    /// Payment coordinator.
    pub payments: Arc<PaymentCoordinator>,
    /// Upload coordinator.
    pub uploads: Arc<UploadCoordinator>,
    /// Per-IP pending-upload limiter.
    pub limiter: Arc<PendingLimiter>,
    /// Real wallet handle for webhook ingestion. None in mock mode, which
    /// turns the webhook route into a 503.
    pub webhook_wallet: Option<Arc<AlbyWallet>>,
    /// Request rate limiting state.
    pub rate_limit: RateLimitState,
}

impl AppState {
    /// Create application state and wire the settlement callback into the
    /// pending limiter.
    ///
    /// # Panics
    ///
    /// Panics if configuration validation fails; warnings are logged.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn BlobStore>,
        metadata: Arc<dyn MetaStore>,
        payments: Arc<PaymentCoordinator>,
        webhook_wallet: Option<Arc<AlbyWallet>>,
    ) -> Self {
        if let Err(error) = config.limits.validate() {
            panic!("Invalid limit configuration: {error}");
        }
        if let Err(error) = config.janitor.validate() {
            panic!("Invalid janitor configuration: {error}");
        }
        match config.rate_limit.validate() {
            Ok(warnings) => {
                for warning in warnings {
                    tracing::warn!("Configuration warning: {warning}");
                }
            }
            Err(error) => panic!("Invalid rate limit configuration: {error}"),
        }

        let limiter = Arc::new(PendingLimiter::new(config.limits.max_pending));

        // Settlement-driven clearing: the coordinator invokes this after
        // MarkPaid, which frees the payer's admission slot.
        let callback_limiter = limiter.clone();
        payments.set_callback(Arc::new(move |file_id: &str| {
            callback_limiter.clear(file_id);
        }));

        let uploads = Arc::new(UploadCoordinator::new(
            storage.clone(),
            metadata.clone(),
            config.limits.clone(),
        ));

        // Dev mode runs without throttling.
        let rate_limit = if config.server.dev_mode {
            RateLimitState::new(&satoshisend_core::config::RateLimitConfig {
                enabled: false,
                ..config.rate_limit.clone()
            })
        } else {
            RateLimitState::new(&config.rate_limit)
        };

        Self {
            config: Arc::new(config),
            storage,
            metadata,
            payments,
            uploads,
            limiter,
            webhook_wallet,
            rate_limit,
        }
    }
}
