//! Stripe provider adapter
//!
//! Signature verification goes through `stripe::Webhook` first and falls
//! back to manual `t=`/`v1=` HMAC verification for API versions the SDK
//! does not parse. Native Stripe event types are mapped onto the
//! normalized taxonomy; anything unrecognized becomes `ignored`.

use std::collections::HashMap;

use hmac::{Hmac, Mac};
use sha2::Sha256;
// The proration behavior enum lives in the subscription module, not the
// crate root
use stripe::generated::billing::subscription::SubscriptionProrationBehavior;
use stripe::{
    CheckoutSessionMode, CreateBillingPortalSession, CreateCheckoutSession,
    CreateCheckoutSessionLineItems, CreateCheckoutSessionPaymentIntentData,
    CreateCheckoutSessionSubscriptionData, Event, EventObject, EventType, Invoice,
    InvoiceBillingReason, RecurringInterval, Subscription, SubscriptionStatus,
    UpdateSubscription, UpdateSubscriptionItems, Webhook,
};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{PaymentError, PaymentResult};
use crate::event::{
    CheckoutParams, CheckoutSession, PaymentCycle, PaymentInfo, ProviderCapabilities,
    SubscriptionInfo, WebhookEvent, WebhookEventKind,
};

type HmacSha256 = Hmac<Sha256>;

/// Tolerance for the signature header's timestamp (replay window)
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
}

pub struct StripeProvider {
    client: stripe::Client,
    config: StripeConfig,
}

impl std::fmt::Debug for StripeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // stripe::Client does not implement Debug
        f.debug_struct("StripeProvider")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl StripeProvider {
    pub fn new(config: StripeConfig) -> Self {
        let client = stripe::Client::new(config.secret_key.clone());
        Self { client, config }
    }

    pub fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            subscription: true,
            one_time: true,
            customer_portal: true,
            refund: true,
        }
    }

    /// Create a hosted checkout session, round-tripping our identifiers
    /// through session/subscription/payment-intent metadata
    pub async fn create_checkout(&self, params: &CheckoutParams) -> PaymentResult<CheckoutSession> {
        let mut metadata = HashMap::new();
        metadata.insert("order_id".to_string(), params.order_id.clone());
        metadata.insert("user_id".to_string(), params.user_id.to_string());
        metadata.insert("plan_id".to_string(), params.plan_id.clone());
        metadata.insert("price_id".to_string(), params.price_id.clone());

        let mut create = CreateCheckoutSession::new();
        create.mode = Some(if params.subscription {
            CheckoutSessionMode::Subscription
        } else {
            CheckoutSessionMode::Payment
        });
        create.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price: Some(params.price_id.clone()),
            quantity: Some(1),
            ..Default::default()
        }]);
        create.success_url = Some(&params.success_url);
        create.cancel_url = Some(&params.cancel_url);
        create.client_reference_id = Some(&params.order_id);
        create.metadata = Some(metadata.clone());
        if params.subscription {
            // Subscription events carry their own metadata; propagate ours
            // so webhook payloads can be attributed without a session
            // lookup
            create.subscription_data = Some(CreateCheckoutSessionSubscriptionData {
                metadata: Some(metadata),
                ..Default::default()
            });
        } else {
            create.payment_intent_data = Some(CreateCheckoutSessionPaymentIntentData {
                metadata: Some(metadata),
                ..Default::default()
            });
        }

        let session = stripe::CheckoutSession::create(&self.client, create).await?;
        let checkout_url = session
            .url
            .ok_or_else(|| PaymentError::Internal("checkout session has no url".to_string()))?;

        Ok(CheckoutSession {
            session_id: session.id.to_string(),
            checkout_url,
        })
    }

    /// Verify and normalize a webhook delivery
    pub fn handle_webhook(&self, payload: &str, signature: &str) -> PaymentResult<WebhookEvent> {
        let event = self.verify_event(payload, signature)?;
        Ok(map_event(event))
    }

    /// Verify and parse a Stripe webhook event.
    ///
    /// Tries the SDK verifier first; newer Stripe API versions can fail
    /// its payload parsing, so a manual signature check over the raw body
    /// backs it up.
    fn verify_event(&self, payload: &str, signature: &str) -> PaymentResult<Event> {
        match Webhook::construct_event(payload, signature, &self.config.webhook_secret) {
            Ok(event) => return Ok(event),
            Err(e) => {
                tracing::warn!(
                    stripe_error = %e,
                    "SDK webhook parsing failed, trying manual verification"
                );
            }
        }

        verify_signature(
            payload,
            signature,
            &self.config.webhook_secret,
            OffsetDateTime::now_utc().unix_timestamp(),
        )?;

        let event: Event = serde_json::from_str(payload).map_err(|e| {
            tracing::error!(parse_error = %e, "Failed to parse webhook event JSON");
            PaymentError::SignatureInvalid
        })?;

        tracing::debug!(
            event_type = %event.type_,
            event_id = %event.id,
            "Manual webhook parsing succeeded"
        );
        Ok(event)
    }

    /// Flip the subscription to cancel at period end
    pub async fn cancel_subscription(&self, provider_subscription_id: &str) -> PaymentResult<()> {
        let sub_id = provider_subscription_id
            .parse::<stripe::SubscriptionId>()
            .map_err(|e| PaymentError::Internal(format!("invalid subscription id: {e}")))?;

        let params = UpdateSubscription {
            cancel_at_period_end: Some(true),
            ..Default::default()
        };
        Subscription::update(&self.client, &sub_id, params).await?;
        Ok(())
    }

    /// Swap the subscription onto a new price, prorating the difference
    pub async fn update_subscription(
        &self,
        provider_subscription_id: &str,
        new_price_id: &str,
    ) -> PaymentResult<()> {
        let sub_id = provider_subscription_id
            .parse::<stripe::SubscriptionId>()
            .map_err(|e| PaymentError::Internal(format!("invalid subscription id: {e}")))?;

        let current = Subscription::retrieve(&self.client, &sub_id, &[]).await?;
        let item_id = current
            .items
            .data
            .first()
            .map(|item| item.id.to_string())
            .ok_or_else(|| PaymentError::Internal("no subscription items found".to_string()))?;

        let params = UpdateSubscription {
            items: Some(vec![UpdateSubscriptionItems {
                id: Some(item_id),
                price: Some(new_price_id.to_string()),
                ..Default::default()
            }]),
            proration_behavior: Some(SubscriptionProrationBehavior::CreateProrations),
            ..Default::default()
        };
        Subscription::update(&self.client, &sub_id, params).await?;
        Ok(())
    }

    pub async fn customer_portal_url(
        &self,
        provider_customer_id: &str,
        return_url: &str,
    ) -> PaymentResult<String> {
        let customer_id = provider_customer_id
            .parse::<stripe::CustomerId>()
            .map_err(|e| PaymentError::Internal(format!("invalid customer id: {e}")))?;

        let mut create = CreateBillingPortalSession::new(customer_id);
        create.return_url = Some(return_url);
        let session = stripe::BillingPortalSession::create(&self.client, create).await?;
        Ok(session.url)
    }
}

/// Manual verification of Stripe's `t=timestamp,v1=signature` header:
/// HMAC-SHA256 over `"{timestamp}.{payload}"` with the webhook secret.
fn verify_signature(
    payload: &str,
    signature: &str,
    webhook_secret: &str,
    now_unix: i64,
) -> PaymentResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut v1_signature: Option<&str> = None;

    for part in signature.split(',') {
        match part.split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => v1_signature = Some(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(PaymentError::SignatureInvalid)?;
    let v1_signature = v1_signature.ok_or(PaymentError::SignatureInvalid)?;

    if (now_unix - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        tracing::warn!(
            timestamp = timestamp,
            now = now_unix,
            "Webhook timestamp outside tolerance"
        );
        return Err(PaymentError::SignatureInvalid);
    }

    // The "whsec_" prefix is not part of the key material
    let secret_key = webhook_secret
        .strip_prefix("whsec_")
        .unwrap_or(webhook_secret);
    let signed_payload = format!("{timestamp}.{payload}");

    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .map_err(|_| PaymentError::SignatureInvalid)?;
    mac.update(signed_payload.as_bytes());

    let expected = hex::decode(v1_signature).map_err(|_| PaymentError::SignatureInvalid)?;
    mac.verify_slice(&expected)
        .map_err(|_| PaymentError::SignatureInvalid)
}

/// Map a verified Stripe event onto the normalized taxonomy
fn map_event(event: Event) -> WebhookEvent {
    let event_id = event.id.to_string();
    match (event.type_, event.data.object) {
        (EventType::CheckoutSessionCompleted, _) => WebhookEvent {
            kind: WebhookEventKind::CheckoutCompleted,
            provider_event_id: Some(event_id),
            payment: None,
            subscription: None,
        },
        (EventType::InvoicePaid, EventObject::Invoice(invoice)) => WebhookEvent {
            kind: WebhookEventKind::PaymentSucceeded,
            provider_event_id: Some(event_id),
            payment: Some(map_invoice(&invoice, "succeeded")),
            subscription: invoice_subscription(&invoice),
        },
        (EventType::InvoicePaymentFailed, EventObject::Invoice(invoice)) => WebhookEvent {
            kind: WebhookEventKind::PaymentFailed,
            provider_event_id: Some(event_id),
            payment: Some(map_invoice(&invoice, "failed")),
            subscription: None,
        },
        (EventType::CustomerSubscriptionCreated, EventObject::Subscription(sub)) => WebhookEvent {
            kind: WebhookEventKind::SubscriptionCreated,
            provider_event_id: Some(event_id),
            payment: None,
            subscription: Some(map_subscription(&sub)),
        },
        (EventType::CustomerSubscriptionUpdated, EventObject::Subscription(sub)) => WebhookEvent {
            kind: WebhookEventKind::SubscriptionUpdated,
            provider_event_id: Some(event_id),
            payment: None,
            subscription: Some(map_subscription(&sub)),
        },
        (EventType::CustomerSubscriptionDeleted, EventObject::Subscription(sub)) => WebhookEvent {
            kind: WebhookEventKind::SubscriptionCanceled,
            provider_event_id: Some(event_id),
            payment: None,
            subscription: Some(map_subscription(&sub)),
        },
        (EventType::ChargeRefunded, EventObject::Charge(charge)) => {
            let provider_payment_id = match &charge.invoice {
                Some(stripe::Expandable::Id(id)) => id.to_string(),
                Some(stripe::Expandable::Object(inv)) => inv.id.to_string(),
                None => charge.id.to_string(),
            };
            WebhookEvent {
                kind: WebhookEventKind::RefundCreated,
                provider_event_id: Some(event_id),
                payment: Some(PaymentInfo {
                    provider_payment_id,
                    status: "refunded".to_string(),
                    refund_amount_cents: Some(charge.amount_refunded),
                    currency: charge.currency.to_string(),
                    amount_cents: charge.amount,
                    ..Default::default()
                }),
                subscription: None,
            }
        }
        (event_type, _) => {
            tracing::info!(
                event_type = %event_type,
                event_id = %event_id,
                "Unhandled Stripe event type, ignoring"
            );
            WebhookEvent::ignored(Some(event_id))
        }
    }
}

fn map_invoice(invoice: &Invoice, status: &str) -> PaymentInfo {
    let metadata = invoice.metadata.clone().unwrap_or_default();

    let provider_customer_id = match &invoice.customer {
        Some(stripe::Expandable::Id(id)) => Some(id.to_string()),
        Some(stripe::Expandable::Object(c)) => Some(c.id.to_string()),
        None => None,
    };
    let provider_subscription_id = match &invoice.subscription {
        Some(stripe::Expandable::Id(id)) => Some(id.to_string()),
        Some(stripe::Expandable::Object(s)) => Some(s.id.to_string()),
        None => None,
    };

    let cycle_type = match &invoice.billing_reason {
        Some(InvoiceBillingReason::SubscriptionCreate) => Some(PaymentCycle::Create),
        Some(InvoiceBillingReason::SubscriptionCycle) => Some(PaymentCycle::Renewal),
        _ => None,
    };

    PaymentInfo {
        provider_payment_id: invoice.id.to_string(),
        provider_invoice_id: Some(invoice.id.to_string()),
        provider_customer_id,
        provider_subscription_id,
        amount_cents: invoice.amount_paid.unwrap_or(0),
        currency: invoice
            .currency
            .as_ref()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "usd".to_string()),
        status: status.to_string(),
        cycle_type,
        order_id: metadata.get("order_id").cloned(),
        plan_id: metadata.get("plan_id").cloned(),
        price_id: metadata.get("price_id").cloned(),
        user_id: metadata.get("user_id").and_then(|s| Uuid::parse_str(s).ok()),
        refund_amount_cents: None,
        metadata: serde_json::to_value(&metadata).unwrap_or_default(),
    }
}

/// Subscription state carried by a paid invoice. The invoice's line items
/// hold the billing window the charge covers, which on a renewal is the
/// NEW period; the subscription record in our database still holds the
/// old one at this point.
fn invoice_subscription(invoice: &Invoice) -> Option<SubscriptionInfo> {
    let provider_subscription_id = match invoice.subscription.as_ref()? {
        stripe::Expandable::Id(id) => id.to_string(),
        stripe::Expandable::Object(s) => s.id.to_string(),
    };
    let provider_customer_id = match &invoice.customer {
        Some(stripe::Expandable::Id(id)) => Some(id.to_string()),
        Some(stripe::Expandable::Object(c)) => Some(c.id.to_string()),
        None => None,
    };
    let period = invoice
        .lines
        .as_ref()
        .and_then(|lines| lines.data.first())
        .and_then(|line| line.period.as_ref());
    let metadata = invoice.metadata.clone().unwrap_or_default();

    Some(SubscriptionInfo {
        provider_subscription_id,
        provider_customer_id,
        status: "active".to_string(),
        plan_id: metadata.get("plan_id").cloned(),
        price_id: metadata.get("price_id").cloned(),
        user_id: metadata.get("user_id").and_then(|s| Uuid::parse_str(s).ok()),
        current_period_start: period.and_then(|p| p.start).and_then(unix_ts),
        current_period_end: period.and_then(|p| p.end).and_then(unix_ts),
        metadata: serde_json::to_value(&metadata).unwrap_or_default(),
        ..Default::default()
    })
}

fn map_subscription(sub: &Subscription) -> SubscriptionInfo {
    let metadata = &sub.metadata;
    let price = sub.items.data.first().and_then(|item| item.price.as_ref());

    let provider_customer_id = match &sub.customer {
        stripe::Expandable::Id(id) => id.to_string(),
        stripe::Expandable::Object(c) => c.id.to_string(),
    };

    SubscriptionInfo {
        provider_subscription_id: sub.id.to_string(),
        provider_customer_id: Some(provider_customer_id),
        status: subscription_status_str(sub.status).to_string(),
        price_id: price.map(|p| p.id.to_string()),
        plan_id: metadata.get("plan_id").cloned(),
        user_id: metadata.get("user_id").and_then(|s| Uuid::parse_str(s).ok()),
        interval: price
            .and_then(|p| p.recurring.as_ref())
            .map(|r| recurring_interval_str(r.interval).to_string()),
        amount_cents: price.and_then(|p| p.unit_amount),
        currency: price.and_then(|p| p.currency).map(|c| c.to_string()),
        current_period_start: unix_ts(sub.current_period_start),
        current_period_end: unix_ts(sub.current_period_end),
        cancel_at_period_end: sub.cancel_at_period_end,
        canceled_at: sub.canceled_at.and_then(unix_ts),
        cancel_reason: None,
        trial_start: sub.trial_start.and_then(unix_ts),
        trial_end: sub.trial_end.and_then(unix_ts),
        metadata: serde_json::to_value(metadata).unwrap_or_default(),
    }
}

fn unix_ts(ts: i64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(ts).ok()
}

fn subscription_status_str(status: SubscriptionStatus) -> &'static str {
    match status {
        SubscriptionStatus::Active => "active",
        SubscriptionStatus::Canceled => "canceled",
        SubscriptionStatus::Incomplete => "incomplete",
        SubscriptionStatus::IncompleteExpired => "incomplete_expired",
        SubscriptionStatus::PastDue => "past_due",
        SubscriptionStatus::Paused => "paused",
        SubscriptionStatus::Trialing => "trialing",
        SubscriptionStatus::Unpaid => "unpaid",
    }
}

fn recurring_interval_str(interval: RecurringInterval) -> &'static str {
    match interval {
        RecurringInterval::Day => "day",
        RecurringInterval::Week => "week",
        RecurringInterval::Month => "month",
        RecurringInterval::Year => "year",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";

    fn sign(payload: &str, timestamp: i64) -> String {
        let key = SECRET.strip_prefix("whsec_").unwrap();
        let mut mac = HmacSha256::new_from_slice(key.as_bytes()).unwrap();
        mac.update(format!("{timestamp}.{payload}").as_bytes());
        let sig = hex::encode(mac.finalize().into_bytes());
        format!("t={timestamp},v1={sig}")
    }

    #[test]
    fn valid_signature_passes() {
        let payload = r#"{"id":"evt_1","type":"invoice.paid"}"#;
        let header = sign(payload, 1_700_000_000);
        assert!(verify_signature(payload, &header, SECRET, 1_700_000_000).is_ok());
    }

    #[test]
    fn tampered_payload_fails() {
        let header = sign(r#"{"amount":100}"#, 1_700_000_000);
        let err =
            verify_signature(r#"{"amount":999}"#, &header, SECRET, 1_700_000_000).unwrap_err();
        assert!(matches!(err, PaymentError::SignatureInvalid));
    }

    #[test]
    fn stale_timestamp_fails() {
        let payload = r#"{"id":"evt_1"}"#;
        let header = sign(payload, 1_700_000_000);
        let err = verify_signature(
            payload,
            &header,
            SECRET,
            1_700_000_000 + SIGNATURE_TOLERANCE_SECS + 1,
        )
        .unwrap_err();
        assert!(matches!(err, PaymentError::SignatureInvalid));
    }

    #[test]
    fn missing_header_parts_fail() {
        let payload = "{}";
        for header in ["", "t=123", "v1=deadbeef", "junk"] {
            let err = verify_signature(payload, header, SECRET, 123).unwrap_err();
            assert!(matches!(err, PaymentError::SignatureInvalid));
        }
    }

    #[test]
    fn renewal_invoice_carries_the_new_billing_period() {
        // A subscription_cycle invoice must surface the period its line
        // items cover; renewal processing rolls the subscription row
        // forward from it and the credit grant expires at its end.
        let payload = r#"{
            "id": "evt_renew1",
            "object": "event",
            "created": 1756684800,
            "livemode": false,
            "pending_webhooks": 0,
            "type": "invoice.paid",
            "data": {
                "object": {
                    "object": "invoice",
                    "id": "in_renew1",
                    "subscription": "sub_renew1",
                    "billing_reason": "subscription_cycle",
                    "amount_paid": 2900,
                    "currency": "usd",
                    "lines": {
                        "data": [{
                            "id": "il_renew1",
                            "object": "line_item",
                            "amount": 2900,
                            "currency": "usd",
                            "discountable": false,
                            "livemode": false,
                            "metadata": {},
                            "proration": false,
                            "type": "subscription",
                            "period": { "start": 1756684800, "end": 1759276800 }
                        }],
                        "has_more": false,
                        "url": "/v1/invoices/in_renew1/lines"
                    }
                }
            }
        }"#;

        let event: Event = serde_json::from_str(payload).unwrap();
        let mapped = map_event(event);

        assert_eq!(mapped.kind, WebhookEventKind::PaymentSucceeded);
        let payment = mapped.payment.unwrap();
        assert_eq!(payment.cycle_type, Some(PaymentCycle::Renewal));
        assert_eq!(
            payment.provider_subscription_id.as_deref(),
            Some("sub_renew1")
        );

        let sub = mapped.subscription.expect("paid invoice carries subscription state");
        assert_eq!(sub.provider_subscription_id, "sub_renew1");
        assert_eq!(
            sub.current_period_start,
            Some(OffsetDateTime::from_unix_timestamp(1_756_684_800).unwrap())
        );
        assert_eq!(
            sub.current_period_end,
            Some(OffsetDateTime::from_unix_timestamp(1_759_276_800).unwrap())
        );
    }

    #[test]
    fn invoice_without_subscription_maps_no_subscription_state() {
        let invoice: Invoice = serde_json::from_str(r#"{"id": "in_oneoff1"}"#).unwrap();
        assert!(invoice_subscription(&invoice).is_none());
    }
}
