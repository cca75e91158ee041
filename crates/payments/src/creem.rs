//! Creem provider adapter
//!
//! Creem has no Rust SDK; webhooks are verified by recomputing
//! HMAC-SHA256 over the raw body and the REST API is called through
//! `reqwest`. One-time purchases complete inside `checkout.completed`
//! (there is no separate invoice object), so a checkout carrying an
//! order but no subscription maps to `payment.succeeded` directly;
//! subscription charges arrive as `subscription.paid`.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use uuid::Uuid;

use crate::error::{PaymentError, PaymentResult};
use crate::event::{
    CheckoutParams, CheckoutSession, PaymentInfo, ProviderCapabilities, SubscriptionInfo,
    WebhookEvent, WebhookEventKind,
};

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_API_BASE: &str = "https://api.creem.io";

#[derive(Debug, Clone)]
pub struct CreemConfig {
    pub api_key: String,
    pub webhook_secret: String,
    /// Overridable for the test-mode API host
    pub api_base: String,
}

impl CreemConfig {
    pub fn new(api_key: String, webhook_secret: String) -> Self {
        Self {
            api_key,
            webhook_secret,
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct CreemProvider {
    http: reqwest::Client,
    config: CreemConfig,
}

/// Outer webhook envelope; `object` stays untyped because its shape
/// varies per event type
#[derive(Debug, Deserialize)]
struct CreemEnvelope {
    id: Option<String>,
    #[serde(rename = "eventType")]
    event_type: String,
    object: Value,
}

impl CreemProvider {
    pub fn new(config: CreemConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            subscription: true,
            one_time: true,
            customer_portal: true,
            refund: true,
        }
    }

    pub async fn create_checkout(&self, params: &CheckoutParams) -> PaymentResult<CheckoutSession> {
        let body = json!({
            "product_id": params.price_id,
            "request_id": params.order_id,
            "success_url": params.success_url,
            "metadata": {
                "order_id": params.order_id,
                "user_id": params.user_id.to_string(),
                "plan_id": params.plan_id,
                "price_id": params.price_id,
            },
        });

        let response = self
            .http
            .post(format!("{}/v1/checkouts", self.config.api_base))
            .header("x-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        #[derive(Deserialize)]
        struct CheckoutResponse {
            id: String,
            checkout_url: String,
        }
        let created: CheckoutResponse = response.json().await?;
        Ok(CheckoutSession {
            session_id: created.id,
            checkout_url: created.checkout_url,
        })
    }

    pub fn handle_webhook(&self, payload: &str, signature: &str) -> PaymentResult<WebhookEvent> {
        verify_signature(payload, signature, &self.config.webhook_secret)?;

        let envelope: CreemEnvelope = serde_json::from_str(payload)
            .map_err(|e| PaymentError::InvalidPayload(e.to_string()))?;

        Ok(map_event(envelope))
    }

    pub async fn cancel_subscription(&self, provider_subscription_id: &str) -> PaymentResult<()> {
        self.http
            .post(format!(
                "{}/v1/subscriptions/{}/cancel",
                self.config.api_base, provider_subscription_id
            ))
            .header("x-api-key", &self.config.api_key)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Move the subscription onto a different product; Creem prorates the
    /// difference on the next charge
    pub async fn update_subscription(
        &self,
        provider_subscription_id: &str,
        new_price_id: &str,
    ) -> PaymentResult<()> {
        self.http
            .post(format!(
                "{}/v1/subscriptions/{}/upgrade",
                self.config.api_base, provider_subscription_id
            ))
            .header("x-api-key", &self.config.api_key)
            .json(&json!({ "product_id": new_price_id }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn customer_portal_url(
        &self,
        provider_customer_id: &str,
    ) -> PaymentResult<String> {
        let response = self
            .http
            .post(format!("{}/v1/customers/billing", self.config.api_base))
            .header("x-api-key", &self.config.api_key)
            .json(&json!({ "customer_id": provider_customer_id }))
            .send()
            .await?
            .error_for_status()?;

        #[derive(Deserialize)]
        struct PortalResponse {
            customer_portal_link: String,
        }
        let portal: PortalResponse = response.json().await?;
        Ok(portal.customer_portal_link)
    }
}

/// HMAC-SHA256 over the raw body, hex-encoded in the signature header.
/// `verify_slice` keeps the comparison constant-time.
fn verify_signature(payload: &str, signature: &str, secret: &str) -> PaymentResult<()> {
    let expected = hex::decode(signature.trim()).map_err(|_| PaymentError::SignatureInvalid)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| PaymentError::SignatureInvalid)?;
    mac.update(payload.as_bytes());
    mac.verify_slice(&expected)
        .map_err(|_| PaymentError::SignatureInvalid)
}

fn map_event(envelope: CreemEnvelope) -> WebhookEvent {
    let event_id = envelope.id.clone();
    let object = &envelope.object;

    match envelope.event_type.as_str() {
        "checkout.completed" => {
            // A completed checkout without a subscription is the whole
            // lifecycle of a one-time purchase
            if object.get("order").is_some() && object.get("subscription").is_none() {
                WebhookEvent {
                    kind: WebhookEventKind::PaymentSucceeded,
                    provider_event_id: event_id,
                    payment: Some(map_order_payment(object)),
                    subscription: None,
                }
            } else {
                WebhookEvent {
                    kind: WebhookEventKind::CheckoutCompleted,
                    provider_event_id: event_id,
                    payment: None,
                    subscription: None,
                }
            }
        }
        "subscription.active" => WebhookEvent {
            kind: WebhookEventKind::SubscriptionCreated,
            provider_event_id: event_id,
            payment: None,
            subscription: Some(map_subscription(object)),
        },
        "subscription.paid" => WebhookEvent {
            kind: WebhookEventKind::PaymentSucceeded,
            provider_event_id: event_id,
            payment: Some(map_subscription_payment(object)),
            subscription: Some(map_subscription(object)),
        },
        "subscription.update" => WebhookEvent {
            kind: WebhookEventKind::SubscriptionUpdated,
            provider_event_id: event_id,
            payment: None,
            subscription: Some(map_subscription(object)),
        },
        "subscription.canceled" | "subscription.expired" => WebhookEvent {
            kind: WebhookEventKind::SubscriptionCanceled,
            provider_event_id: event_id,
            payment: None,
            subscription: Some(map_subscription(object)),
        },
        "refund.created" => WebhookEvent {
            kind: WebhookEventKind::RefundCreated,
            provider_event_id: event_id,
            payment: Some(map_refund(object)),
            subscription: None,
        },
        other => {
            tracing::info!(event_type = %other, "Unhandled Creem event type, ignoring");
            WebhookEvent::ignored(event_id)
        }
    }
}

/// One-time purchase carried inside a completed checkout
fn map_order_payment(object: &Value) -> PaymentInfo {
    let order = object.get("order").unwrap_or(&Value::Null);
    let metadata = object.get("metadata").cloned().unwrap_or_default();

    PaymentInfo {
        provider_payment_id: str_field(order, "transaction")
            .or_else(|| str_field(order, "id"))
            .unwrap_or_default(),
        provider_invoice_id: None,
        provider_customer_id: id_or_object_id(object.get("customer")),
        provider_subscription_id: None,
        amount_cents: order.get("amount").and_then(Value::as_i64).unwrap_or(0),
        currency: str_field(order, "currency").unwrap_or_else(|| "usd".to_string()),
        status: "succeeded".to_string(),
        cycle_type: None,
        order_id: str_field(&metadata, "order_id")
            .or_else(|| str_field(object, "request_id")),
        plan_id: str_field(&metadata, "plan_id"),
        price_id: str_field(&metadata, "price_id")
            .or_else(|| id_or_object_id(object.get("product"))),
        user_id: uuid_field(&metadata, "user_id"),
        refund_amount_cents: None,
        metadata,
    }
}

/// Recurring charge carried by `subscription.paid`
fn map_subscription_payment(object: &Value) -> PaymentInfo {
    let metadata = object.get("metadata").cloned().unwrap_or_default();

    PaymentInfo {
        provider_payment_id: str_field(object, "last_transaction_id")
            .or_else(|| id_or_object_id(object.get("last_transaction")))
            .unwrap_or_default(),
        provider_invoice_id: None,
        provider_customer_id: id_or_object_id(object.get("customer")),
        provider_subscription_id: str_field(object, "id"),
        amount_cents: object
            .get("last_transaction")
            .and_then(|t| t.get("amount"))
            .and_then(Value::as_i64)
            .unwrap_or(0),
        currency: object
            .get("last_transaction")
            .and_then(|t| str_field(t, "currency"))
            .unwrap_or_else(|| "usd".to_string()),
        status: "succeeded".to_string(),
        // Creem does not distinguish first charge from renewal; the
        // pipeline classifies by whether the subscription row exists
        cycle_type: None,
        order_id: str_field(&metadata, "order_id"),
        plan_id: str_field(&metadata, "plan_id"),
        price_id: str_field(&metadata, "price_id")
            .or_else(|| id_or_object_id(object.get("product"))),
        user_id: uuid_field(&metadata, "user_id"),
        refund_amount_cents: None,
        metadata,
    }
}

fn map_subscription(object: &Value) -> SubscriptionInfo {
    let metadata = object.get("metadata").cloned().unwrap_or_default();

    SubscriptionInfo {
        provider_subscription_id: str_field(object, "id").unwrap_or_default(),
        provider_customer_id: id_or_object_id(object.get("customer")),
        status: str_field(object, "status").unwrap_or_else(|| "active".to_string()),
        price_id: str_field(&metadata, "price_id")
            .or_else(|| id_or_object_id(object.get("product"))),
        plan_id: str_field(&metadata, "plan_id"),
        user_id: uuid_field(&metadata, "user_id"),
        interval: object
            .get("product")
            .and_then(|p| str_field(p, "billing_period")),
        amount_cents: object
            .get("product")
            .and_then(|p| p.get("price"))
            .and_then(Value::as_i64),
        currency: object
            .get("product")
            .and_then(|p| str_field(p, "currency")),
        current_period_start: datetime_field(object, "current_period_start_date"),
        current_period_end: datetime_field(object, "current_period_end_date"),
        cancel_at_period_end: str_field(object, "status").as_deref() == Some("canceled"),
        canceled_at: datetime_field(object, "canceled_at"),
        cancel_reason: None,
        trial_start: None,
        trial_end: None,
        metadata,
    }
}

fn map_refund(object: &Value) -> PaymentInfo {
    PaymentInfo {
        provider_payment_id: id_or_object_id(object.get("transaction"))
            .or_else(|| id_or_object_id(object.get("order")))
            .unwrap_or_default(),
        status: "refunded".to_string(),
        refund_amount_cents: object
            .get("refund_amount")
            .and_then(Value::as_i64),
        currency: str_field(object, "refund_currency").unwrap_or_else(|| "usd".to_string()),
        provider_customer_id: id_or_object_id(object.get("customer")),
        provider_subscription_id: id_or_object_id(object.get("subscription")),
        metadata: object.get("metadata").cloned().unwrap_or_default(),
        ..Default::default()
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn uuid_field(value: &Value, key: &str) -> Option<Uuid> {
    value
        .get(key)
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
}

/// Creem references related objects either as a bare id string or as an
/// expanded object with an `id` field
fn id_or_object_id(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(id) => Some(id.clone()),
        obj @ Value::Object(_) => str_field(obj, "id"),
        _ => None,
    }
}

fn datetime_field(value: &Value, key: &str) -> Option<OffsetDateTime> {
    value
        .get(key)
        .and_then(Value::as_str)
        .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "creem_whsec_test";

    fn sign(payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn provider() -> CreemProvider {
        CreemProvider::new(CreemConfig::new("key".to_string(), SECRET.to_string()))
    }

    #[test]
    fn valid_signature_passes() {
        let payload = r#"{"id":"evt_1","eventType":"subscription.update","object":{}}"#;
        let event = provider().handle_webhook(payload, &sign(payload)).unwrap();
        assert_eq!(event.kind, WebhookEventKind::SubscriptionUpdated);
        assert_eq!(event.provider_event_id.as_deref(), Some("evt_1"));
    }

    #[test]
    fn tampered_payload_rejected() {
        let signed = r#"{"eventType":"subscription.update","object":{}}"#;
        let tampered = r#"{"eventType":"subscription.canceled","object":{}}"#;
        let err = provider().handle_webhook(tampered, &sign(signed)).unwrap_err();
        assert!(matches!(err, PaymentError::SignatureInvalid));
    }

    #[test]
    fn non_hex_signature_rejected() {
        let payload = r#"{"eventType":"subscription.update","object":{}}"#;
        let err = provider().handle_webhook(payload, "not-hex!").unwrap_err();
        assert!(matches!(err, PaymentError::SignatureInvalid));
    }

    #[test]
    fn unknown_event_type_maps_to_ignored() {
        let payload = r#"{"id":"evt_2","eventType":"dispute.created","object":{}}"#;
        let event = provider().handle_webhook(payload, &sign(payload)).unwrap();
        assert_eq!(event.kind, WebhookEventKind::Ignored);
        assert_eq!(event.provider_event_id.as_deref(), Some("evt_2"));
    }

    #[test]
    fn one_time_checkout_maps_to_payment_succeeded() {
        let payload = serde_json::to_string(&json!({
            "id": "evt_3",
            "eventType": "checkout.completed",
            "object": {
                "id": "ch_1",
                "order": {
                    "id": "ord_1",
                    "transaction": "tran_1",
                    "amount": 1900,
                    "currency": "usd"
                },
                "customer": { "id": "cust_1" },
                "product": "prod_basic",
                "metadata": {
                    "order_id": "order-abc",
                    "user_id": "8b4a4f8e-7d5a-4c2b-9f3e-1a2b3c4d5e6f",
                    "plan_id": "basic",
                    "price_id": "prod_basic"
                }
            }
        }))
        .unwrap();

        let event = provider().handle_webhook(&payload, &sign(&payload)).unwrap();
        assert_eq!(event.kind, WebhookEventKind::PaymentSucceeded);
        let payment = event.payment.unwrap();
        assert_eq!(payment.provider_payment_id, "tran_1");
        assert_eq!(payment.amount_cents, 1900);
        assert_eq!(payment.plan_id.as_deref(), Some("basic"));
        assert_eq!(payment.order_id.as_deref(), Some("order-abc"));
        assert!(payment.user_id.is_some());
        assert!(payment.cycle_type.is_none());
        assert!(payment.provider_subscription_id.is_none());
    }

    #[test]
    fn subscription_checkout_maps_to_checkout_completed() {
        let payload = serde_json::to_string(&json!({
            "id": "evt_4",
            "eventType": "checkout.completed",
            "object": {
                "id": "ch_2",
                "order": { "id": "ord_2", "amount": 990, "currency": "usd" },
                "subscription": { "id": "sub_1" }
            }
        }))
        .unwrap();

        let event = provider().handle_webhook(&payload, &sign(&payload)).unwrap();
        assert_eq!(event.kind, WebhookEventKind::CheckoutCompleted);
        assert!(event.payment.is_none());
    }

    #[test]
    fn subscription_paid_carries_payment_and_subscription() {
        let payload = serde_json::to_string(&json!({
            "id": "evt_5",
            "eventType": "subscription.paid",
            "object": {
                "id": "sub_2",
                "status": "active",
                "customer": "cust_2",
                "product": {
                    "id": "prod_pro",
                    "price": 2900,
                    "currency": "usd",
                    "billing_period": "month"
                },
                "last_transaction": { "id": "tran_9", "amount": 2900, "currency": "usd" },
                "current_period_start_date": "2026-08-01T00:00:00Z",
                "current_period_end_date": "2026-09-01T00:00:00Z",
                "metadata": {
                    "user_id": "8b4a4f8e-7d5a-4c2b-9f3e-1a2b3c4d5e6f",
                    "plan_id": "pro"
                }
            }
        }))
        .unwrap();

        let event = provider().handle_webhook(&payload, &sign(&payload)).unwrap();
        assert_eq!(event.kind, WebhookEventKind::PaymentSucceeded);

        let payment = event.payment.unwrap();
        assert_eq!(payment.provider_payment_id, "tran_9");
        assert_eq!(payment.provider_subscription_id.as_deref(), Some("sub_2"));
        assert_eq!(payment.amount_cents, 2900);

        let sub = event.subscription.unwrap();
        assert_eq!(sub.provider_subscription_id, "sub_2");
        assert_eq!(sub.interval.as_deref(), Some("month"));
        assert!(sub.current_period_end.is_some());
        assert_eq!(sub.plan_id.as_deref(), Some("pro"));
    }
}
