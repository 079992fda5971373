//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use flux_billing_core::BillingError;
use flux_billing_store::StoreError;

/// API error type.
///
/// Everything except authentication and rate limiting is reported as 400,
/// with a stable `code` for clients to branch on.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("Not authenticated")]
    Unauthorized,

    /// Too many requests in the current window.
    #[error("Too Many Requests")]
    TooManyRequests,

    /// Request rejected with a caller-facing message.
    #[error("{message}")]
    BadRequest {
        /// Stable machine-readable code.
        code: &'static str,
        /// Human-readable message.
        message: String,
    },

    /// Unexpected failure. Logged; the caller sees a generic message.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// A `400` with the given code and message.
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::BadRequest {
            code,
            message: message.into(),
        }
    }
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, error) = match self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthenticated",
                "Not authenticated".to_string(),
            ),
            Self::TooManyRequests => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "Too Many Requests".to_string(),
            ),
            Self::BadRequest { code, message } => (StatusCode::BAD_REQUEST, code, message),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::BAD_REQUEST,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };

        (status, Json(ErrorResponse { error, code })).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::Unauthenticated => Self::Unauthorized,
            BillingError::RateLimited => Self::TooManyRequests,
            BillingError::Validation(msg) => Self::bad_request("validation_error", msg),
            BillingError::InvalidId(e) => Self::bad_request("validation_error", e.to_string()),
            BillingError::InsufficientCredit { .. } => {
                Self::bad_request("insufficient_credit", "Insufficient credit")
            }
            BillingError::UpstreamInconsistency(_) => {
                Self::bad_request("upstream_inconsistency", "Create Task Error")
            }
            BillingError::Upstream(msg) => Self::bad_request("upstream_error", msg),
            BillingError::OrderPhase { .. } => {
                Self::bad_request("order_phase_error", "Order Phase Error")
            }
            BillingError::SignatureInvalid(msg) => {
                Self::bad_request("signature_invalid", format!("Webhook Error: {msg}"))
            }
            err @ BillingError::NotFound { .. } => Self::bad_request("not_found", err.to_string()),
            BillingError::Storage(msg) => Self::Internal(msg),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        BillingError::from(err).into()
    }
}
