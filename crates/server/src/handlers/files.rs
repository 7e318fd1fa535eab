//! Retrieval handlers: download, status, invoice re-fetch.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE};
use axum::http::{Method, StatusCode};
use axum::response::Response;
use satoshisend_core::FileId;
use satoshisend_metadata::FileMeta;
use serde::Serialize;
use time::OffsetDateTime;

const OCTET_STREAM: &str = "application/octet-stream";

/// Look up metadata for a retrievable blob: must exist, be paid, and be
/// unexpired, in that order of reporting.
async fn retrievable_meta(state: &AppState, file_id: &FileId) -> ApiResult<FileMeta> {
    let meta = state
        .metadata
        .get_file_meta(file_id.as_str())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("file {file_id}")))?;

    if !meta.paid {
        return Err(ApiError::NotPaid);
    }
    if meta.is_expired(OffsetDateTime::now_utc()) {
        return Err(ApiError::Gone);
    }
    Ok(meta)
}

fn response(builder: axum::http::response::Builder, body: Body) -> ApiResult<Response> {
    builder
        .body(body)
        .map_err(|e| ApiError::Internal(format!("failed to build response: {e}")))
}

/// GET/HEAD /api/file/{id} - Serve blob bytes.
///
/// Single byte ranges are honoured when the backend supports random access;
/// multi-range and malformed Range headers fall back to the full body.
pub async fn download(
    State(state): State<AppState>,
    Path(id): Path<String>,
    req: Request,
) -> ApiResult<Response> {
    let file_id = FileId::parse(&id)?;
    let meta = retrievable_meta(&state, &file_id).await?;
    let size = meta.size as u64;

    let ranges_supported = state.storage.supports_ranges();
    let base = || {
        let mut builder = Response::builder().header(CONTENT_TYPE, OCTET_STREAM);
        if ranges_supported {
            builder = builder.header(ACCEPT_RANGES, "bytes");
        }
        builder
    };

    if req.method() == Method::HEAD {
        return response(base().header(CONTENT_LENGTH, size), Body::empty());
    }

    if ranges_supported
        && let Some(header) = req.headers().get(RANGE)
        && let Some((start, end)) = parse_range(header.to_str().unwrap_or(""), size)?
    {
        let data = state
            .storage
            .load_range(file_id.as_str(), start, end)
            .await?;
        return response(
            base()
                .status(StatusCode::PARTIAL_CONTENT)
                .header(CONTENT_RANGE, format!("bytes {}-{}/{}", start, end - 1, size))
                .header(CONTENT_LENGTH, data.len()),
            Body::from(data),
        );
    }

    let stream = state.storage.load(file_id.as_str()).await?;
    response(
        base().header(CONTENT_LENGTH, size),
        Body::from_stream(stream),
    )
}

/// Parse a `Range` header into a half-open `[start, end)` interval.
///
/// Returns `Ok(None)` for headers we choose to ignore (absent `bytes=`
/// prefix, multiple ranges, malformed values) so the caller serves the full
/// body, and `RangeNotSatisfiable` for well-formed ranges outside the blob.
fn parse_range(header: &str, size: u64) -> ApiResult<Option<(u64, u64)>> {
    let Some(spec) = header.strip_prefix("bytes=") else {
        return Ok(None);
    };
    if spec.contains(',') {
        return Ok(None);
    }

    let Some((start_str, end_str)) = spec.split_once('-') else {
        return Ok(None);
    };

    if start_str.is_empty() {
        // Suffix range: last `n` bytes.
        let Ok(suffix) = end_str.parse::<u64>() else {
            return Ok(None);
        };
        if suffix == 0 || size == 0 {
            return Err(ApiError::RangeNotSatisfiable);
        }
        let start = size.saturating_sub(suffix);
        return Ok(Some((start, size)));
    }

    let Ok(start) = start_str.parse::<u64>() else {
        return Ok(None);
    };
    if start >= size {
        return Err(ApiError::RangeNotSatisfiable);
    }

    if end_str.is_empty() {
        return Ok(Some((start, size)));
    }

    let Ok(end_inclusive) = end_str.parse::<u64>() else {
        return Ok(None);
    };
    if end_inclusive < start {
        return Ok(None);
    }
    Ok(Some((start, end_inclusive.saturating_add(1).min(size))))
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub paid: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub size: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direct_url: Option<String>,
}

/// GET /api/file/{id}/status - Blob status.
pub async fn file_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    let file_id = FileId::parse(&id)?;
    let meta = state
        .metadata
        .get_file_meta(file_id.as_str())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("file {file_id}")))?;

    // Direct download URLs are only revealed once the blob is paid for.
    let direct_url = if meta.paid {
        state.storage.public_url(file_id.as_str())
    } else {
        None
    };

    Ok(Json(StatusResponse {
        paid: meta.paid,
        expires_at: meta.expires_at,
        size: meta.size,
        direct_url,
    }))
}

#[derive(Debug, Serialize)]
pub struct InvoiceResponse {
    pub payment_request: String,
    pub payment_hash: String,
    pub amount_sats: i64,
}

/// GET /api/file/{id}/invoice - Re-fetch the pending invoice for a blob.
pub async fn file_invoice(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<InvoiceResponse>> {
    let file_id = FileId::parse(&id)?;
    let invoice = state
        .payments
        .get_invoice_for(file_id.as_str())
        .ok_or_else(|| ApiError::NotFound(format!("no pending invoice for {file_id}")))?;

    Ok(Json(InvoiceResponse {
        payment_request: invoice.payment_request,
        payment_hash: invoice.payment_hash,
        amount_sats: invoice.amount_sats,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_range_variants() {
        assert_eq!(parse_range("bytes=0-99", 1000).unwrap(), Some((0, 100)));
        assert_eq!(parse_range("bytes=500-", 1000).unwrap(), Some((500, 1000)));
        assert_eq!(parse_range("bytes=-100", 1000).unwrap(), Some((900, 1000)));
        // End clamped to the blob size.
        assert_eq!(parse_range("bytes=900-2000", 1000).unwrap(), Some((900, 1000)));
        // Suffix longer than the blob covers the whole blob.
        assert_eq!(parse_range("bytes=-5000", 1000).unwrap(), Some((0, 1000)));
    }

    #[test]
    fn ignored_ranges_fall_back_to_full_body() {
        assert_eq!(parse_range("", 1000).unwrap(), None);
        assert_eq!(parse_range("items=0-99", 1000).unwrap(), None);
        assert_eq!(parse_range("bytes=0-99,200-299", 1000).unwrap(), None);
        assert_eq!(parse_range("bytes=abc-def", 1000).unwrap(), None);
        assert_eq!(parse_range("bytes=99-0", 1000).unwrap(), None);
        assert_eq!(parse_range("bytes=5", 1000).unwrap(), None);
    }

    #[test]
    fn unsatisfiable_ranges_are_rejected() {
        assert!(matches!(
            parse_range("bytes=1000-", 1000),
            Err(ApiError::RangeNotSatisfiable)
        ));
        assert!(matches!(
            parse_range("bytes=5000-6000", 1000),
            Err(ApiError::RangeNotSatisfiable)
        ));
        assert!(matches!(
            parse_range("bytes=-0", 1000),
            Err(ApiError::RangeNotSatisfiable)
        ));
        assert!(matches!(
            parse_range("bytes=0-", 0),
            Err(ApiError::RangeNotSatisfiable)
        ));
    }
}
