//! Settlement webhook ingress.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use satoshisend_payments::PaymentError;

/// Maximum accepted webhook body size (1 MiB).
const MAX_WEBHOOK_BODY_SIZE: usize = 1024 * 1024;

/// POST /api/webhook/alby - Verify and ingest a wallet settlement webhook.
///
/// Returns 200 even when the settled hash is unknown: the wallet retries
/// unacknowledged deliveries, and replays of already-processed settlements
/// must not surface as failures. Verification problems are always 400, never
/// 401, so probes cannot learn whether a secret is configured.
pub async fn alby_webhook(State(state): State<AppState>, req: Request) -> ApiResult<StatusCode> {
    let Some(wallet) = state.webhook_wallet.clone() else {
        return Err(ApiError::DependencyUnavailable(
            "wallet not configured for webhook delivery".to_string(),
        ));
    };

    let (parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_WEBHOOK_BODY_SIZE)
        .await
        .map_err(|e| ApiError::InvalidInput(format!("failed to read body: {e}")))?;

    wallet
        .verify_and_ingest(&bytes, &parts.headers)
        .map_err(|e| match e {
            PaymentError::Verification(reason) => {
                tracing::warn!(reason = %reason, "webhook verification failed");
                ApiError::VerificationFailed
            }
            PaymentError::Parse(reason) => {
                tracing::warn!(reason = %reason, "webhook body parse failed");
                ApiError::VerificationFailed
            }
            other => other.into(),
        })?;

    Ok(StatusCode::OK)
}
