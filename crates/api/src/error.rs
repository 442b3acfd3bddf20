//! API error mapping
//!
//! Translates `LedgerError` into HTTP statuses. The mapping encodes the
//! delivery contract with the payment provider: idempotent duplicates are
//! success, transient provider/storage faults are 5xx so the provider's
//! at-least-once retry redelivers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use promptly_ledger::LedgerError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("bad request: {0}")]
    BadRequest(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", msg.clone())
            }
            ApiError::Ledger(err) => match err {
                LedgerError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "validation_error", msg.clone())
                }
                LedgerError::AccountNotFound(_)
                | LedgerError::PackNotFound(_)
                | LedgerError::TransactionNotFound(_) => {
                    (StatusCode::NOT_FOUND, "not_found", err.to_string())
                }
                LedgerError::UnknownCurrency(c) => (
                    StatusCode::BAD_REQUEST,
                    "unknown_currency",
                    format!("unknown currency: {}", c),
                ),
                LedgerError::InsufficientCredits { .. } => (
                    StatusCode::PAYMENT_REQUIRED,
                    "insufficient_credits",
                    err.to_string(),
                ),
                LedgerError::PromoRejected(reason) => (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "promo_rejected",
                    reason.to_string(),
                ),
                // Idempotent no-op is success for the caller; handlers that
                // can produce this normally map it before erroring, this is
                // the fallback.
                LedgerError::DuplicateTransaction(_) => {
                    (StatusCode::OK, "duplicate", "already processed".to_string())
                }
                LedgerError::ProviderUnavailable(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "provider_unavailable",
                    "payment provider unavailable".to_string(),
                ),
                LedgerError::Persistence(_) | LedgerError::Config(_) => {
                    tracing::error!(error = %err, "Internal error serving request");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal_error",
                        "internal error".to_string(),
                    )
                }
            },
        };

        (status, Json(json!({ "error": code, "message": message }))).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use promptly_ledger::PromoRejection;

    fn status_of(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_business_errors_are_4xx() {
        assert_eq!(
            status_of(LedgerError::Validation("x".into()).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(
                LedgerError::InsufficientCredits {
                    balance: 1,
                    requested: 2
                }
                .into()
            ),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            status_of(LedgerError::PromoRejected(PromoRejection::Expired).into()),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_transient_faults_are_5xx_for_redelivery() {
        assert_eq!(
            status_of(LedgerError::ProviderUnavailable("timeout".into()).into()),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(LedgerError::Persistence("down".into()).into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_duplicate_is_success() {
        assert_eq!(
            status_of(LedgerError::DuplicateTransaction("txn".into()).into()),
            StatusCode::OK
        );
    }
}
