//! Webhook and checkout endpoints

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use saasbase_payments::{
    CheckoutParams, CheckoutSession, PaymentError, ProviderKey, SubscriptionStore,
};
use saasbase_shared::{PriceType, FREE_USER_PURCHASE_ALLOWED};

use crate::error::{ApiError, ApiResult};
use crate::routes::user_id_from_headers;
use crate::state::AppState;

/// Signature header per provider
fn signature_header(provider: ProviderKey) -> &'static str {
    match provider {
        ProviderKey::Stripe => "stripe-signature",
        ProviderKey::Creem => "creem-signature",
    }
}

/// Receive one webhook delivery: verify, normalize, reconcile.
///
/// 200 acknowledges the delivery, including ignored event kinds; 400
/// tells the provider to keep retrying (unknown provider, bad signature,
/// malformed payload).
pub async fn handle_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<serde_json::Value>> {
    let key: ProviderKey = provider.parse().map_err(ApiError::Payment)?;
    let adapter = state.providers.get(key)?;

    let signature = headers
        .get(signature_header(key))
        .and_then(|v| v.to_str().ok())
        .ok_or(PaymentError::SignatureInvalid)?;

    let event = adapter.handle_webhook(&body, signature)?;
    state.processor.process(key, &event).await?;

    Ok(Json(json!({ "received": true })))
}

/// Providers probe the webhook URL when it is registered
pub async fn webhook_liveness(Path(provider): Path<String>) -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "provider": provider }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub provider: ProviderKey,
    pub plan_id: String,
    pub price_id: String,
}

/// Create a hosted checkout session for a plan price. Capability checks
/// happen in the adapter dispatch layer; unknown plans and prices are
/// rejected here first.
pub async fn create_checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CheckoutRequest>,
) -> ApiResult<Json<CheckoutSession>> {
    let user_id = user_id_from_headers(&headers)?;

    let plan = state
        .catalog
        .plan_by_id(&request.plan_id)
        .ok_or_else(|| PaymentError::PlanNotFound(request.plan_id.clone()))?;
    let price = plan
        .prices
        .iter()
        .find(|p| p.price_id == request.price_id)
        .ok_or_else(|| PaymentError::PlanNotFound(request.price_id.clone()))?;

    let subscription = price.price_type == PriceType::Subscription;
    if !subscription {
        // Credit packs can be restricted to subscribers at runtime;
        // unset means allowed
        let purchase_allowed = state
            .settings
            .get_bool_or(FREE_USER_PURCHASE_ALLOWED, true)
            .await?;
        let has_active = if purchase_allowed {
            true
        } else {
            SubscriptionStore::has_active_for_user(&state.pool, user_id).await?
        };
        if one_time_purchase_blocked(purchase_allowed, has_active) {
            tracing::info!(
                user_id = %user_id,
                plan_id = %plan.id,
                "One-time purchase blocked for user without an active subscription"
            );
            return Err(ApiError::BadRequest(
                "credit pack purchases require an active subscription".to_string(),
            ));
        }
    }

    let adapter = state.providers.get(request.provider)?;
    let session = adapter
        .create_checkout(&CheckoutParams {
            order_id: Uuid::new_v4().to_string(),
            user_id,
            plan_id: plan.id.clone(),
            price_id: price.price_id.clone(),
            subscription,
            success_url: state.config.checkout_success_url.clone(),
            cancel_url: state.config.checkout_cancel_url.clone(),
        })
        .await?;

    tracing::info!(
        user_id = %user_id,
        plan_id = %plan.id,
        price_id = %price.price_id,
        provider = %request.provider,
        session_id = %session.session_id,
        "Created checkout session"
    );
    Ok(Json(session))
}

/// A one-time purchase goes through unless free-user purchasing is
/// disabled and the user holds no active subscription
fn one_time_purchase_blocked(purchase_allowed: bool, has_active_subscription: bool) -> bool {
    !purchase_allowed && !has_active_subscription
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_time_purchases_blocked_only_for_unsubscribed_free_users() {
        assert!(one_time_purchase_blocked(false, false));
        assert!(!one_time_purchase_blocked(false, true));
        assert!(!one_time_purchase_blocked(true, false));
        assert!(!one_time_purchase_blocked(true, true));
    }
}
