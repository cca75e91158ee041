//! Route table and shared request helpers

pub mod admin;
pub mod credits;
pub mod payment;

use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/payment/webhook/{provider}",
            post(payment::handle_webhook).get(payment::webhook_liveness),
        )
        .route("/api/payment/checkout", post(payment::create_checkout))
        .route("/api/credits/balance", get(credits::get_balance))
        .route("/api/credits/history", get(credits::get_history))
        .route("/api/admin/credits/grant", post(admin::grant_credits))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// User identity, injected as a header by the upstream auth proxy. The
/// proxy has already authenticated the request; this layer only parses.
pub fn user_id_from_headers(headers: &HeaderMap) -> ApiResult<Uuid> {
    let raw = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("missing x-user-id header".to_string()))?;
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest("invalid x-user-id header".to_string()))
}
