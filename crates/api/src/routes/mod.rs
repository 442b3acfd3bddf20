//! HTTP routes

pub mod credits;
pub mod packs;
pub mod webhooks;

use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::state::AppState;

/// Build the application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        // Payment provider entry points
        .route("/api/webhooks/payments", post(webhooks::handle_webhook))
        .route("/api/payments/callback", get(webhooks::handle_callback))
        // User-facing credit operations
        .route("/api/users/{user_id}/checkout", post(credits::create_checkout))
        .route("/api/users/{user_id}/credits", get(credits::get_balance))
        .route("/api/users/{user_id}/credits/use", post(credits::use_credits))
        .route("/api/users/{user_id}/tier", get(credits::get_tier))
        .route(
            "/api/users/{user_id}/transactions",
            get(credits::list_transactions),
        )
        .route("/api/users/{user_id}/purchases", get(credits::list_purchases))
        // Pricing catalog
        .route("/api/packs", get(packs::list_packs))
        .route("/api/packs/{pack_id}/price", get(packs::resolve_price))
        // Admin write-path hooks
        .route(
            "/api/admin/pricing/invalidate",
            post(packs::invalidate_pricing_cache),
        )
        .route("/api/admin/invariants", get(packs::run_invariants))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
