//! Admin credit grant endpoint
//!
//! Admin authorization is enforced by the upstream proxy, like user
//! identity on the credits endpoints.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use saasbase_ledger::{CreditsType, GrantCredits};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantRequest {
    pub user_id: Uuid,
    pub amount: i32,
    pub description: Option<String>,
}

pub async fn grant_credits(
    State(state): State<AppState>,
    Json(request): Json<GrantRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    // Grants are additions by contract; reject before dispatch
    if request.amount <= 0 {
        return Err(ApiError::BadRequest(
            "amount must be greater than 0".to_string(),
        ));
    }

    state
        .credits
        .increase_credits(GrantCredits {
            user_id: request.user_id,
            credits: request.amount,
            credits_type: CreditsType::AdminGrant,
            payment_id: None,
            expires_at: None,
            description: request.description,
        })
        .await?;

    Ok(Json(json!({ "success": true })))
}
