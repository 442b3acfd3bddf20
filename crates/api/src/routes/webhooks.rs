//! Payment provider entry points
//!
//! The server-to-server webhook answers `{"received": true}` with HTTP 200
//! for every handled outcome, including idempotent duplicates; transient
//! faults answer 5xx so the provider redelivers. The redirect callback never
//! decides crediting: it runs the same provider-verified processing and only
//! picks the user-facing message.

use axum::extract::{Query, State};
use axum::response::Redirect;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use promptly_ledger::{LedgerError, WebhookEvent, WebhookOutcome};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// POST /api/webhooks/payments
pub async fn handle_webhook(
    State(state): State<AppState>,
    body: Result<Json<WebhookEvent>, axum::extract::rejection::JsonRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let Json(event) = body.map_err(|e| ApiError::BadRequest(format!("malformed body: {}", e)))?;

    match state.ledger.webhooks.handle_event(&event).await {
        Ok(outcome) => {
            tracing::debug!(outcome = ?outcome, "Webhook handled");
            Ok(Json(json!({ "received": true })))
        }
        // Duplicates are success to the provider: at-most-once crediting
        // under at-least-once delivery.
        Err(LedgerError::DuplicateTransaction(_)) => Ok(Json(json!({ "received": true }))),
        Err(err) => Err(err.into()),
    }
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub id: Option<String>,
    /// Advisory only; never gates crediting
    #[allow(dead_code)]
    pub status: Option<String>,
    #[allow(dead_code)]
    pub close: Option<String>,
}

/// GET /api/payments/callback
pub async fn handle_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Redirect {
    let result_url = &state.config.frontend_result_url;

    let Some(transaction_id) = params.id.filter(|id| !id.is_empty()) else {
        return Redirect::to(&format!("{}?error=missing_transaction", result_url));
    };

    match state.ledger.webhooks.handle_callback(&transaction_id).await {
        Ok(WebhookOutcome::Credited { total_credits, .. }) => {
            Redirect::to(&format!("{}?success=true&credits={}", result_url, total_credits))
        }
        Ok(WebhookOutcome::Duplicate { total_credits }) => {
            // Already credited by the webhook path; still a success for the user.
            Redirect::to(&format!(
                "{}?success=true&credits={}",
                result_url, total_credits
            ))
        }
        Ok(WebhookOutcome::StatusRecorded(status)) => {
            let reason = match status {
                promptly_ledger::ProviderStatus::Declined => "declined",
                promptly_ledger::ProviderStatus::Canceled => "canceled",
                _ => "failed",
            };
            Redirect::to(&format!("{}?error={}", result_url, reason))
        }
        Ok(WebhookOutcome::Pending) => Redirect::to(&format!("{}?error=pending", result_url)),
        Err(err) => {
            tracing::error!(
                transaction_id = %transaction_id,
                error = %err,
                "Payment callback processing failed"
            );
            Redirect::to(&format!("{}?error=processing_failed", result_url))
        }
    }
}
