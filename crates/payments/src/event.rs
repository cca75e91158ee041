//! Normalized webhook event envelope
//!
//! Every provider adapter translates its native webhook payloads into
//! this one shape; the reconciliation pipeline only ever sees these
//! types. Unrecognized provider event types map to
//! [`WebhookEventKind::Ignored`] and never raise.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::PaymentError;

/// Runtime key selecting a provider adapter; also the `{provider}` path
/// segment of the webhook endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKey {
    Stripe,
    Creem,
}

impl ProviderKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKey::Stripe => "stripe",
            ProviderKey::Creem => "creem",
        }
    }
}

impl std::fmt::Display for ProviderKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKey {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stripe" => Ok(ProviderKey::Stripe),
            "creem" => Ok(ProviderKey::Creem),
            other => Err(PaymentError::ProviderNotSupported(other.to_string())),
        }
    }
}

/// What an adapter supports; checked at the boundary before dispatch
#[derive(Debug, Clone, Copy)]
pub struct ProviderCapabilities {
    pub subscription: bool,
    pub one_time: bool,
    pub customer_portal: bool,
    pub refund: bool,
}

/// Fixed normalized event taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookEventKind {
    CheckoutCompleted,
    PaymentSucceeded,
    PaymentFailed,
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionCanceled,
    RefundCreated,
    Ignored,
}

impl WebhookEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookEventKind::CheckoutCompleted => "checkout.completed",
            WebhookEventKind::PaymentSucceeded => "payment.succeeded",
            WebhookEventKind::PaymentFailed => "payment.failed",
            WebhookEventKind::SubscriptionCreated => "subscription.created",
            WebhookEventKind::SubscriptionUpdated => "subscription.updated",
            WebhookEventKind::SubscriptionCanceled => "subscription.canceled",
            WebhookEventKind::RefundCreated => "refund.created",
            WebhookEventKind::Ignored => "ignored",
        }
    }
}

impl std::fmt::Display for WebhookEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a payment is the first charge of a subscription or a renewal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentCycle {
    Create,
    Renewal,
}

/// Normalized payment details carried by payment-ish events
#[derive(Debug, Clone, Default)]
pub struct PaymentInfo {
    /// Provider-assigned payment id; the idempotency key
    pub provider_payment_id: String,
    pub provider_invoice_id: Option<String>,
    pub provider_customer_id: Option<String>,
    /// Set when the payment belongs to a subscription
    pub provider_subscription_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub status: String,
    pub cycle_type: Option<PaymentCycle>,
    pub order_id: Option<String>,
    pub plan_id: Option<String>,
    pub price_id: Option<String>,
    pub user_id: Option<Uuid>,
    /// Refund amount for `refund.created` events
    pub refund_amount_cents: Option<i64>,
    pub metadata: serde_json::Value,
}

/// Normalized subscription details carried by subscription-ish events
#[derive(Debug, Clone, Default)]
pub struct SubscriptionInfo {
    pub provider_subscription_id: String,
    pub provider_customer_id: Option<String>,
    pub status: String,
    pub price_id: Option<String>,
    pub plan_id: Option<String>,
    pub user_id: Option<Uuid>,
    pub interval: Option<String>,
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<OffsetDateTime>,
    pub cancel_reason: Option<String>,
    pub trial_start: Option<OffsetDateTime>,
    pub trial_end: Option<OffsetDateTime>,
    pub metadata: serde_json::Value,
}

/// One verified, normalized webhook delivery
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub kind: WebhookEventKind,
    /// Provider's own event id, for log correlation
    pub provider_event_id: Option<String>,
    pub payment: Option<PaymentInfo>,
    pub subscription: Option<SubscriptionInfo>,
}

impl WebhookEvent {
    pub fn ignored(provider_event_id: Option<String>) -> Self {
        Self {
            kind: WebhookEventKind::Ignored,
            provider_event_id,
            payment: None,
            subscription: None,
        }
    }
}

/// Parameters for creating a hosted checkout session
#[derive(Debug, Clone)]
pub struct CheckoutParams {
    /// Internal order id, round-tripped through provider metadata
    pub order_id: String,
    pub user_id: Uuid,
    pub plan_id: String,
    pub price_id: String,
    /// True for recurring prices; routes the session into subscription
    /// mode on providers that distinguish
    pub subscription: bool,
    pub success_url: String,
    pub cancel_url: String,
}

/// Hosted checkout session handle returned to the frontend
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSession {
    pub session_id: String,
    pub checkout_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_key_round_trips() {
        assert_eq!("stripe".parse::<ProviderKey>().unwrap(), ProviderKey::Stripe);
        assert_eq!("creem".parse::<ProviderKey>().unwrap(), ProviderKey::Creem);
        assert_eq!(ProviderKey::Creem.as_str(), "creem");
        assert!(matches!(
            "paypal".parse::<ProviderKey>(),
            Err(PaymentError::ProviderNotSupported(p)) if p == "paypal"
        ));
    }

    #[test]
    fn event_kind_uses_dotted_names() {
        assert_eq!(
            WebhookEventKind::PaymentSucceeded.to_string(),
            "payment.succeeded"
        );
        assert_eq!(WebhookEventKind::Ignored.to_string(), "ignored");
    }
}
