//! User-facing credit endpoints

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use promptly_ledger::{
    BalanceInfo, CheckoutResponse, PurchaseRecord, TierInfo, TransactionRecord,
};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub pack_id: Uuid,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub promo_code: Option<String>,
}

fn default_currency() -> String {
    promptly_ledger::CANONICAL_CURRENCY.to_string()
}

/// POST /api/users/{user_id}/checkout
pub async fn create_checkout(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(request): Json<CheckoutRequest>,
) -> ApiResult<Json<CheckoutResponse>> {
    let response = state
        .ledger
        .checkout
        .create_checkout(
            user_id,
            request.pack_id,
            &request.currency,
            request.promo_code.as_deref(),
        )
        .await?;

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct UseCreditsRequest {
    pub amount: i64,
    pub action: String,
    pub prompt_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct UseCreditsResponse {
    pub new_balance: i64,
}

/// POST /api/users/{user_id}/credits/use
///
/// Called by generation endpoints before invoking the model.
pub async fn use_credits(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(request): Json<UseCreditsRequest>,
) -> ApiResult<Json<UseCreditsResponse>> {
    if request.action.is_empty() {
        return Err(ApiError::BadRequest("action is required".to_string()));
    }

    let new_balance = state
        .ledger
        .credits
        .use_credits(user_id, request.amount, &request.action, request.prompt_id)
        .await?;

    Ok(Json(UseCreditsResponse { new_balance }))
}

/// GET /api/users/{user_id}/credits
pub async fn get_balance(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<BalanceInfo>> {
    Ok(Json(state.ledger.history.get_balance(user_id).await?))
}

/// GET /api/users/{user_id}/tier
pub async fn get_tier(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<TierInfo>> {
    Ok(Json(state.ledger.history.get_tier_info(user_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    25
}

/// GET /api/users/{user_id}/transactions
pub async fn list_transactions(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(page): Query<PageParams>,
) -> ApiResult<Json<Vec<TransactionRecord>>> {
    let records = state
        .ledger
        .history
        .list_transactions(user_id, page.limit, page.offset)
        .await?;
    Ok(Json(records))
}

/// GET /api/users/{user_id}/purchases
pub async fn list_purchases(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(page): Query<PageParams>,
) -> ApiResult<Json<Vec<PurchaseRecord>>> {
    let records = state
        .ledger
        .history
        .list_purchases(user_id, page.limit, page.offset)
        .await?;
    Ok(Json(records))
}
