//! API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use satoshisend_payments::PaymentError;
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type. Component errors carry their kind up to here; this is the
/// single place where kinds become status codes.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    TooLarge(String),

    #[error("{0}")]
    AdmissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("payment required")]
    NotPaid,

    #[error("file expired")]
    Gone,

    #[error("requested range not satisfiable")]
    RangeNotSatisfiable,

    #[error("webhook verification failed")]
    VerificationFailed,

    #[error("{0}")]
    DependencyUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("storage error: {0}")]
    Storage(#[from] satoshisend_storage::StorageError),

    #[error("metadata error: {0}")]
    Metadata(#[from] satoshisend_metadata::MetadataError),

    #[error("payment error: {0}")]
    Payment(#[from] satoshisend_payments::PaymentError),

    #[error("invalid input: {0}")]
    Core(#[from] satoshisend_core::Error),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::TooLarge(_) => "too_large",
            Self::AdmissionDenied(_) => "admission_denied",
            Self::NotFound(_) => "not_found",
            Self::NotPaid => "payment_required",
            Self::Gone => "gone",
            Self::RangeNotSatisfiable => "range_not_satisfiable",
            Self::VerificationFailed => "verification_failed",
            Self::DependencyUnavailable(_) => "dependency_unavailable",
            Self::Internal(_) => "internal_error",
            Self::Storage(_) => "storage_error",
            Self::Metadata(_) => "metadata_error",
            Self::Payment(_) => "payment_error",
            Self::Core(_) => "invalid_input",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::AdmissionDenied(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::NotPaid => StatusCode::PAYMENT_REQUIRED,
            Self::Gone => StatusCode::GONE,
            Self::RangeNotSatisfiable => StatusCode::RANGE_NOT_SATISFIABLE,
            // Never 401: attackers must not learn whether a secret is configured.
            Self::VerificationFailed => StatusCode::BAD_REQUEST,
            Self::DependencyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Storage(e) => match e {
                satoshisend_storage::StorageError::NotFound(_) => StatusCode::NOT_FOUND,
                satoshisend_storage::StorageError::InvalidId(_) => StatusCode::BAD_REQUEST,
                satoshisend_storage::StorageError::InvalidRange(_) => {
                    StatusCode::RANGE_NOT_SATISFIABLE
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Metadata(e) => match e {
                satoshisend_metadata::MetadataError::NotFound(_) => StatusCode::NOT_FOUND,
                satoshisend_metadata::MetadataError::AlreadyExists(_) => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Payment(e) => match e {
                PaymentError::Verification(_) | PaymentError::Parse(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Core(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_map_to_documented_statuses() {
        assert_eq!(
            ApiError::InvalidInput("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::TooLarge("x".into()).status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            ApiError::AdmissionDenied("x".into()).status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(ApiError::NotPaid.status_code(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(ApiError::Gone.status_code(), StatusCode::GONE);
        assert_eq!(
            ApiError::VerificationFailed.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::DependencyUnavailable("x".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn duplicate_metadata_insert_is_conflict() {
        let err = ApiError::Metadata(satoshisend_metadata::MetadataError::AlreadyExists(
            "id".into(),
        ));
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }
}
