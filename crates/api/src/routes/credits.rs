//! Credit balance and history endpoints

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use saasbase_ledger::{CreditBalance, CreditHistoryPage};

use crate::error::ApiResult;
use crate::routes::user_id_from_headers;
use crate::state::AppState;

/// Balance breakdown for the dashboard. Degrades to a zeroed balance on
/// internal failure rather than erroring; the page always renders.
pub async fn get_balance(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<CreditBalance>> {
    let user_id = user_id_from_headers(&headers)?;
    Ok(Json(state.credits.get_user_credits(user_id).await))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    /// Restrict to the trailing N days when set
    pub days: Option<u32>,
}

pub async fn get_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<CreditHistoryPage>> {
    let user_id = user_id_from_headers(&headers)?;
    let page = state
        .credits
        .get_user_credits_history(
            user_id,
            query.page.unwrap_or(1),
            query.limit.unwrap_or(20),
            query.days,
        )
        .await?;
    Ok(Json(page))
}
