//! API error type and HTTP status mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use saasbase_ledger::LedgerError;
use saasbase_payments::PaymentError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error("{0}")]
    BadRequest(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ApiError {
    /// Status plus the message shown to the caller. Internal errors get a
    /// generic message; details stay in the logs.
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),

            ApiError::Ledger(e @ LedgerError::InsufficientCredits { .. }) => {
                (StatusCode::PAYMENT_REQUIRED, e.to_string())
            }
            ApiError::Ledger(e @ LedgerError::InvalidAmount) => {
                (StatusCode::BAD_REQUEST, e.to_string())
            }
            ApiError::Ledger(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            ),

            // 400 keeps the provider's retry loop going until the
            // signature or configuration is fixed
            ApiError::Payment(e @ PaymentError::SignatureInvalid)
            | ApiError::Payment(e @ PaymentError::ProviderNotSupported(_))
            | ApiError::Payment(e @ PaymentError::OperationNotSupported { .. })
            | ApiError::Payment(e @ PaymentError::InvalidPayload(_)) => {
                (StatusCode::BAD_REQUEST, e.to_string())
            }
            ApiError::Payment(e @ PaymentError::PlanNotFound(_)) => {
                (StatusCode::NOT_FOUND, e.to_string())
            }
            ApiError::Payment(PaymentError::Ledger(e @ LedgerError::InsufficientCredits { .. })) => {
                (StatusCode::PAYMENT_REQUIRED, e.to_string())
            }
            ApiError::Payment(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            ),

            ApiError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::warn!(error = %self, status = %status, "Request rejected");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_failure_maps_to_400() {
        let (status, _) = ApiError::Payment(PaymentError::SignatureInvalid).status_and_message();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn insufficient_credits_maps_to_402_with_amounts() {
        let (status, message) = ApiError::Ledger(LedgerError::InsufficientCredits {
            required: 50,
            available: 10,
        })
        .status_and_message();
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert!(message.contains("required 50"));
        assert!(message.contains("available 10"));
    }

    #[test]
    fn internal_errors_hide_details() {
        let (status, message) =
            ApiError::Database(sqlx::Error::PoolClosed).status_and_message();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(message, "internal error");
    }
}
