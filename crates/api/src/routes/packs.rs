//! Pricing catalog and admin endpoints

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use promptly_ledger::{CreditPack, InvariantCheckSummary, PriceQuote};

use crate::error::ApiResult;
use crate::state::AppState;

/// GET /api/packs
pub async fn list_packs(State(state): State<AppState>) -> ApiResult<Json<Vec<CreditPack>>> {
    Ok(Json(state.ledger.packs.list_active().await?))
}

#[derive(Debug, Deserialize)]
pub struct PriceParams {
    #[serde(default = "default_currency")]
    pub currency: String,
    pub promo_code: Option<String>,
    pub user_id: Option<Uuid>,
}

fn default_currency() -> String {
    promptly_ledger::CANONICAL_CURRENCY.to_string()
}

/// GET /api/packs/{pack_id}/price
///
/// Resolves the displayed price including any automatic promotion or a
/// candidate promo code. Resolution never consumes promo budgets.
pub async fn resolve_price(
    State(state): State<AppState>,
    Path(pack_id): Path<Uuid>,
    Query(params): Query<PriceParams>,
) -> ApiResult<Json<PriceQuote>> {
    let quote = state
        .ledger
        .promotions
        .resolve_pack_price(
            pack_id,
            &params.currency,
            params.user_id,
            params.promo_code.as_deref(),
        )
        .await?;

    Ok(Json(quote))
}

/// POST /api/admin/pricing/invalidate
///
/// Admin write path calls this after editing exchange rates or packs so the
/// pricing cache reloads instead of waiting out its TTL.
pub async fn invalidate_pricing_cache(
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    state.ledger.currency.invalidate().await;
    Json(json!({ "invalidated": true }))
}

/// GET /api/admin/invariants
pub async fn run_invariants(
    State(state): State<AppState>,
) -> ApiResult<Json<InvariantCheckSummary>> {
    Ok(Json(state.ledger.invariants.run_all_checks().await?))
}
