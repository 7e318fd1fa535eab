//! Upload protocol handlers: reserve, stream, finalize.

use crate::error::{ApiError, ApiResult};
use crate::ratelimit::client_ip;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_LENGTH;
use satoshisend_core::{FileId, pricing};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Maximum body size for the JSON control-plane requests (64 KiB).
const MAX_JSON_BODY_SIZE: usize = 64 * 1024;

async fn read_json_body<T: DeserializeOwned>(req: Request) -> ApiResult<T> {
    let bytes = axum::body::to_bytes(req.into_body(), MAX_JSON_BODY_SIZE)
        .await
        .map_err(|e| ApiError::InvalidInput(format!("failed to read body: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::InvalidInput(format!("invalid JSON: {e}")))
}

#[derive(Debug, Deserialize)]
pub struct InitUploadRequest {
    pub size: i64,
}

#[derive(Debug, Serialize)]
pub struct InitUploadResponse {
    pub file_id: String,
}

/// POST /api/upload/init - Reserve a file id for a new upload.
pub async fn init_upload(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<InitUploadResponse>> {
    let ip = client_ip(&req);
    let body: InitUploadRequest = read_json_body(req).await?;

    if body.size <= 0 {
        return Err(ApiError::InvalidInput("size must be positive".to_string()));
    }
    if body.size > state.config.limits.max_upload_size {
        return Err(ApiError::TooLarge(format!(
            "file too large (max {} bytes)",
            state.config.limits.max_upload_size
        )));
    }

    if !state.limiter.can_admit(&ip) {
        let count = state.limiter.pending_count(&ip);
        let max = state.limiter.max_pending();
        return Err(ApiError::AdmissionDenied(format!(
            "pending file limit reached: you have {count} unpaid file(s) (max {max}). \
             Please pay for or wait for existing files to expire before uploading more."
        )));
    }

    let file_id = state.uploads.reserve();
    tracing::debug!(file_id = %file_id, ip = %ip, "reserved upload id");

    Ok(Json(InitUploadResponse {
        file_id: file_id.to_string(),
    }))
}

/// PUT /api/upload/{id} - Stream the blob body into storage.
pub async fn put_blob(
    State(state): State<AppState>,
    Path(id): Path<String>,
    req: Request,
) -> ApiResult<StatusCode> {
    let file_id = FileId::parse(&id)?;

    let declared: i64 = req
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| ApiError::InvalidInput("Content-Length header required".to_string()))?;

    let max = state.config.limits.max_upload_size;
    if declared > max {
        return Err(ApiError::TooLarge(format!("file too large (max {max} bytes)")));
    }

    let data = axum::body::to_bytes(req.into_body(), max as usize)
        .await
        .map_err(|_| ApiError::TooLarge(format!("file too large (max {max} bytes)")))?;

    let size = state.uploads.store_blob(&file_id, data).await?;
    tracing::info!(file_id = %file_id, size, "blob stored");

    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub struct CompleteUploadRequest {
    pub file_id: String,
    #[serde(default)]
    pub size: i64,
}

#[derive(Debug, Serialize)]
pub struct CompleteUploadResponse {
    pub file_id: String,
    pub size: i64,
    pub payment_request: String,
    pub payment_hash: String,
    pub amount_sats: i64,
}

/// POST /api/upload/complete - Finalize the upload and mint its invoice.
pub async fn complete_upload(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<CompleteUploadResponse>> {
    let ip = client_ip(&req);
    let body: CompleteUploadRequest = read_json_body(req).await?;
    let file_id = FileId::parse(&body.file_id)?;

    let host_duration = time::Duration::seconds(state.config.limits.host_duration_secs as i64);
    let result = state
        .uploads
        .finalize(&file_id, body.size, host_duration)
        .await?;

    let amount_sats = pricing::price_sats(result.size);
    let invoice = state
        .payments
        .mint_invoice_for(file_id.as_str(), amount_sats)
        .await?;

    state.limiter.track(&ip, file_id.as_str());

    tracing::info!(
        file_id = %file_id,
        size = result.size,
        amount_sats,
        "upload finalized, invoice minted"
    );

    Ok(Json(CompleteUploadResponse {
        file_id: file_id.to_string(),
        size: result.size,
        payment_request: invoice.payment_request,
        payment_hash: invoice.payment_hash,
        amount_sats: invoice.amount_sats,
    }))
}
