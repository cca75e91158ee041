//! Webhook reconciliation pipeline
//!
//! Applies one verified, normalized event to the database in a single
//! transaction. Deliveries are at-least-once; the unique
//! `provider_payment_id` / `provider_subscription_id` columns make
//! redelivery a no-op rather than a double grant.
//!
//! Returning `Ok` acknowledges the delivery. Events that cannot be
//! attributed (unknown subscription, missing user) are logged and
//! acknowledged anyway; erroring would make the provider retry a
//! delivery that can never succeed.

use std::sync::Arc;

use sqlx::{PgConnection, PgPool};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use saasbase_ledger::{CreditService, CreditsType, GrantCredits, GrantMode};
use saasbase_shared::{Plan, PlanCatalog};

use crate::error::{PaymentError, PaymentResult};
use crate::event::{PaymentCycle, PaymentInfo, ProviderKey, SubscriptionInfo, WebhookEvent, WebhookEventKind};
use crate::store::{
    NewPayment, NewSubscription, PaymentStore, PaymentType, SubscriptionRecord, SubscriptionStore,
};

pub struct WebhookProcessor {
    pool: PgPool,
    credits: Arc<CreditService>,
    catalog: PlanCatalog,
}

impl WebhookProcessor {
    pub fn new(pool: PgPool, credits: Arc<CreditService>, catalog: PlanCatalog) -> Self {
        Self {
            pool,
            credits,
            catalog,
        }
    }

    /// Apply one normalized event. One transaction per event: either the
    /// payment row, subscription change and credit grant all commit, or
    /// none do.
    pub async fn process(&self, provider: ProviderKey, event: &WebhookEvent) -> PaymentResult<()> {
        tracing::info!(
            provider = %provider,
            event_kind = %event.kind,
            provider_event_id = event.provider_event_id.as_deref().unwrap_or("-"),
            "Processing webhook event"
        );

        let mut tx = self.pool.begin().await?;
        match event.kind {
            WebhookEventKind::CheckoutCompleted => {
                // Checkout completion is informational; the money moves in
                // the payment events that follow
                tracing::info!(provider = %provider, "Checkout completed");
            }
            WebhookEventKind::PaymentSucceeded => {
                let payment = required_payment(event)?;
                self.payment_succeeded(&mut tx, provider, payment, event.subscription.as_ref())
                    .await?;
            }
            WebhookEventKind::PaymentFailed => {
                let payment = required_payment(event)?;
                tracing::warn!(
                    provider = %provider,
                    provider_payment_id = %payment.provider_payment_id,
                    provider_subscription_id = payment.provider_subscription_id.as_deref().unwrap_or("-"),
                    "Payment failed"
                );
            }
            WebhookEventKind::SubscriptionCreated => {
                let sub = required_subscription(event)?;
                self.subscription_created(&mut tx, provider, sub).await?;
            }
            WebhookEventKind::SubscriptionUpdated => {
                let sub = required_subscription(event)?;
                self.subscription_updated(&mut tx, sub).await?;
            }
            WebhookEventKind::SubscriptionCanceled => {
                let sub = required_subscription(event)?;
                self.subscription_canceled(&mut tx, sub).await?;
            }
            WebhookEventKind::RefundCreated => {
                let payment = required_payment(event)?;
                self.refund_created(&mut tx, payment).await?;
            }
            WebhookEventKind::Ignored => {
                tracing::debug!(provider = %provider, "Ignored event");
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn payment_succeeded(
        &self,
        tx: &mut PgConnection,
        provider: ProviderKey,
        payment: &PaymentInfo,
        subscription: Option<&SubscriptionInfo>,
    ) -> PaymentResult<()> {
        let existing =
            PaymentStore::find_by_provider_payment_id(&mut *tx, &payment.provider_payment_id)
                .await?;

        let sub_record = match payment.provider_subscription_id.as_deref() {
            Some(sub_id) => {
                SubscriptionStore::find_by_provider_subscription_id(&mut *tx, sub_id).await?
            }
            None => None,
        };
        let has_prior_payment = match &sub_record {
            Some(record) => PaymentStore::exists_for_subscription(&mut *tx, record.id).await?,
            None => false,
        };

        let payment_type = match plan_payment_action(
            existing.is_some(),
            payment.cycle_type,
            payment.provider_subscription_id.is_some(),
            has_prior_payment,
        ) {
            PaymentAction::SkipRedelivery => {
                tracing::info!(
                    provider_payment_id = %payment.provider_payment_id,
                    "Payment already recorded, skipping redelivery"
                );
                return Ok(());
            }
            PaymentAction::Record(payment_type) => payment_type,
        };

        // Renewals roll the subscription forward before credits are granted
        if payment_type == PaymentType::SubscriptionRenewal {
            if let Some(sub_id) = payment.provider_subscription_id.as_deref() {
                let (period_start, period_end) = subscription
                    .map(|s| (s.current_period_start, s.current_period_end))
                    .unwrap_or((None, None));
                let updated = SubscriptionStore::update_period(
                    &mut *tx,
                    sub_id,
                    "active",
                    period_start,
                    period_end,
                )
                .await?;
                if updated == 0 {
                    tracing::warn!(
                        provider_subscription_id = %sub_id,
                        "Renewal payment for unknown subscription"
                    );
                }
            }
        }

        let user_id = payment
            .user_id
            .or(sub_record.as_ref().map(|r| r.user_id))
            .or(subscription.and_then(|s| s.user_id));
        let Some(user_id) = user_id else {
            tracing::error!(
                provider = %provider,
                provider_payment_id = %payment.provider_payment_id,
                "Payment has no attributable user, acknowledging without recording"
            );
            return Ok(());
        };

        let plan = self.resolve_plan(payment, sub_record.as_ref());
        let plan_id = plan
            .map(|p| p.id.clone())
            .or_else(|| payment.plan_id.clone())
            .or_else(|| sub_record.as_ref().and_then(|r| r.plan_id.clone()));

        let record = PaymentStore::insert(
            &mut *tx,
            &NewPayment {
                provider,
                provider_payment_id: payment.provider_payment_id.clone(),
                provider_invoice_id: payment.provider_invoice_id.clone(),
                user_id,
                subscription_id: sub_record.as_ref().map(|r| r.id),
                payment_type,
                amount_cents: payment.amount_cents,
                currency: payment.currency.clone(),
                status: payment.status.clone(),
                plan_id,
                price_id: payment
                    .price_id
                    .clone()
                    .or_else(|| sub_record.as_ref().and_then(|r| r.price_id.clone())),
                metadata: payment.metadata.clone(),
            },
        )
        .await?;

        self.grant_plan_credits(
            &mut *tx,
            user_id,
            record.id,
            payment_type,
            plan,
            subscription,
            sub_record.as_ref(),
        )
        .await
    }

    /// Grant the plan's credits for a recorded payment, honoring the
    /// credit service's [`GrantMode`]: best-effort failures are logged and
    /// the event transaction still commits, strict failures abort it.
    #[allow(clippy::too_many_arguments)]
    async fn grant_plan_credits(
        &self,
        tx: &mut PgConnection,
        user_id: Uuid,
        payment_row_id: Uuid,
        payment_type: PaymentType,
        plan: Option<&Plan>,
        subscription: Option<&SubscriptionInfo>,
        sub_record: Option<&SubscriptionRecord>,
    ) -> PaymentResult<()> {
        let Some(plan) = plan else {
            tracing::info!(
                payment_row = %payment_row_id,
                "Payment maps to no plan, skipping credit grant"
            );
            return Ok(());
        };
        let Some(credit) = &plan.credit else {
            tracing::info!(plan_id = %plan.id, "Plan grants no credits");
            return Ok(());
        };

        let period_end = subscription
            .and_then(|s| s.current_period_end)
            .or(sub_record.and_then(|r| r.current_period_end));
        let expires_at = grant_expiry(
            payment_type,
            period_end,
            credit.expire_days,
            OffsetDateTime::now_utc(),
        );

        let credits_type = if payment_type.is_subscription() {
            CreditsType::SubscriptionPayment
        } else {
            CreditsType::OneTimePayment
        };

        let grant = GrantCredits {
            user_id,
            credits: credit.amount,
            credits_type,
            payment_id: Some(payment_row_id),
            expires_at,
            description: Some(format!("Credits for plan {}", plan.id)),
        };

        match self.credits.increase_credits_in_tx(tx, &grant).await {
            Ok(txn) => {
                tracing::info!(
                    user_id = %user_id,
                    transaction_id = %txn.transaction_id,
                    credits = credit.amount,
                    plan_id = %plan.id,
                    "Granted plan credits"
                );
                Ok(())
            }
            Err(e) if self.credits.grant_mode() == GrantMode::BestEffort => {
                tracing::error!(
                    user_id = %user_id,
                    plan_id = %plan.id,
                    error = %e,
                    "Credit grant failed (best-effort mode, swallowed)"
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn subscription_created(
        &self,
        tx: &mut PgConnection,
        provider: ProviderKey,
        sub: &SubscriptionInfo,
    ) -> PaymentResult<()> {
        let existing = SubscriptionStore::find_by_provider_subscription_id(
            &mut *tx,
            &sub.provider_subscription_id,
        )
        .await?;
        if already_applied(&existing) {
            tracing::info!(
                provider_subscription_id = %sub.provider_subscription_id,
                "Subscription already recorded, skipping redelivery"
            );
            return Ok(());
        }

        let Some(user_id) = sub.user_id else {
            tracing::error!(
                provider = %provider,
                provider_subscription_id = %sub.provider_subscription_id,
                "Subscription has no attributable user, acknowledging without recording"
            );
            return Ok(());
        };

        let record = SubscriptionStore::insert(
            &mut *tx,
            &NewSubscription {
                provider,
                provider_subscription_id: sub.provider_subscription_id.clone(),
                provider_customer_id: sub.provider_customer_id.clone(),
                user_id,
                plan_id: sub
                    .plan_id
                    .clone()
                    .or_else(|| self.plan_id_for_price(sub.price_id.as_deref())),
                price_id: sub.price_id.clone(),
                status: sub.status.clone(),
                billing_interval: sub.interval.clone(),
                current_period_start: sub.current_period_start,
                current_period_end: sub.current_period_end,
                trial_start: sub.trial_start,
                trial_end: sub.trial_end,
            },
        )
        .await?;

        tracing::info!(
            subscription_row = %record.id,
            provider_subscription_id = %sub.provider_subscription_id,
            user_id = %user_id,
            "Recorded new subscription"
        );
        Ok(())
    }

    async fn subscription_updated(
        &self,
        tx: &mut PgConnection,
        sub: &SubscriptionInfo,
    ) -> PaymentResult<()> {
        // Update-only: an update for a subscription we never saw created
        // is logged, not inserted
        let updated = SubscriptionStore::update_state(
            &mut *tx,
            &sub.provider_subscription_id,
            &sub.status,
            sub.price_id.as_deref(),
            sub.current_period_start,
            sub.current_period_end,
            sub.cancel_at_period_end,
            sub.trial_start,
            sub.trial_end,
        )
        .await?;
        if updated == 0 {
            tracing::warn!(
                provider_subscription_id = %sub.provider_subscription_id,
                "Update for unknown subscription, ignoring"
            );
        }
        Ok(())
    }

    async fn subscription_canceled(
        &self,
        tx: &mut PgConnection,
        sub: &SubscriptionInfo,
    ) -> PaymentResult<()> {
        let canceled_at = sub.canceled_at.unwrap_or_else(OffsetDateTime::now_utc);
        let updated = SubscriptionStore::mark_canceled(
            &mut *tx,
            &sub.provider_subscription_id,
            canceled_at,
            sub.cancel_reason.as_deref(),
        )
        .await?;
        if updated == 0 {
            tracing::warn!(
                provider_subscription_id = %sub.provider_subscription_id,
                "Cancellation for unknown subscription, ignoring"
            );
        }
        Ok(())
    }

    async fn refund_created(
        &self,
        tx: &mut PgConnection,
        payment: &PaymentInfo,
    ) -> PaymentResult<()> {
        // Records the refund on the payment row only. Already-granted
        // credits are not clawed back automatically; that is an operator
        // decision made through the admin grant surface.
        let updated = PaymentStore::mark_refunded(
            &mut *tx,
            &payment.provider_payment_id,
            "refunded",
            payment.refund_amount_cents,
            OffsetDateTime::now_utc(),
        )
        .await?;
        if updated == 0 {
            tracing::warn!(
                provider_payment_id = %payment.provider_payment_id,
                "Refund for unknown payment, ignoring"
            );
        }
        Ok(())
    }

    fn resolve_plan(
        &self,
        payment: &PaymentInfo,
        sub_record: Option<&SubscriptionRecord>,
    ) -> Option<&Plan> {
        if let Some(plan_id) = payment
            .plan_id
            .as_deref()
            .or(sub_record.and_then(|r| r.plan_id.as_deref()))
        {
            if let Some(plan) = self.catalog.plan_by_id(plan_id) {
                return Some(plan);
            }
            tracing::warn!(plan_id = %plan_id, "Payment references unknown plan");
        }
        payment
            .price_id
            .as_deref()
            .or(sub_record.and_then(|r| r.price_id.as_deref()))
            .and_then(|price_id| self.catalog.plan_by_price_id(price_id))
    }

    fn plan_id_for_price(&self, price_id: Option<&str>) -> Option<String> {
        self.catalog
            .plan_by_price_id(price_id?)
            .map(|p| p.id.clone())
    }
}

fn required_payment(event: &WebhookEvent) -> PaymentResult<&PaymentInfo> {
    event.payment.as_ref().ok_or_else(|| {
        PaymentError::InvalidPayload(format!("{} event without payment details", event.kind))
    })
}

fn required_subscription(event: &WebhookEvent) -> PaymentResult<&SubscriptionInfo> {
    event.subscription.as_ref().ok_or_else(|| {
        PaymentError::InvalidPayload(format!("{} event without subscription details", event.kind))
    })
}

/// Idempotency gate shared by the create-ish events: a row already keyed
/// by the provider's external id means the delivery was applied before.
fn already_applied<T>(existing: &Option<T>) -> bool {
    existing.is_some()
}

/// What to do with a `payment.succeeded` delivery given the recorded state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PaymentAction {
    /// Redelivery of an already-recorded payment; nothing may be written
    /// or granted again
    SkipRedelivery,
    Record(PaymentType),
}

fn plan_payment_action(
    already_recorded: bool,
    cycle: Option<PaymentCycle>,
    has_subscription: bool,
    has_prior_payment: bool,
) -> PaymentAction {
    if already_recorded {
        return PaymentAction::SkipRedelivery;
    }
    PaymentAction::Record(classify_payment_type(
        cycle,
        has_subscription,
        has_prior_payment,
    ))
}

/// Classify a successful payment. The provider's own cycle marker wins;
/// otherwise a subscription payment is a first charge until a prior
/// payment exists for that subscription.
fn classify_payment_type(
    cycle: Option<PaymentCycle>,
    has_subscription: bool,
    has_prior_payment: bool,
) -> PaymentType {
    match (cycle, has_subscription) {
        (Some(PaymentCycle::Create), _) => PaymentType::SubscriptionCreate,
        (Some(PaymentCycle::Renewal), _) => PaymentType::SubscriptionRenewal,
        (None, true) if has_prior_payment => PaymentType::SubscriptionRenewal,
        (None, true) => PaymentType::SubscriptionCreate,
        (None, false) => PaymentType::OneTime,
    }
}

/// When granted credits expire: subscription grants die at period end,
/// one-time grants after the plan's `expire_days` (or never).
fn grant_expiry(
    payment_type: PaymentType,
    period_end: Option<OffsetDateTime>,
    expire_days: Option<i64>,
    now: OffsetDateTime,
) -> Option<OffsetDateTime> {
    if payment_type.is_subscription() {
        period_end
    } else {
        expire_days.map(|days| now + Duration::days(days))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn provider_cycle_marker_wins() {
        assert_eq!(
            classify_payment_type(Some(PaymentCycle::Create), true, true),
            PaymentType::SubscriptionCreate
        );
        assert_eq!(
            classify_payment_type(Some(PaymentCycle::Renewal), true, false),
            PaymentType::SubscriptionRenewal
        );
    }

    #[test]
    fn unmarked_subscription_payment_classified_by_history() {
        assert_eq!(
            classify_payment_type(None, true, false),
            PaymentType::SubscriptionCreate
        );
        assert_eq!(
            classify_payment_type(None, true, true),
            PaymentType::SubscriptionRenewal
        );
    }

    #[test]
    fn payment_without_subscription_is_one_time() {
        assert_eq!(classify_payment_type(None, false, false), PaymentType::OneTime);
    }

    #[test]
    fn redelivered_payment_is_skipped_before_any_write() {
        // The same providerPaymentId delivered twice: the second pass
        // sees the recorded row and must produce no second payment row
        // and no second grant, whatever else the event claims
        assert_eq!(
            plan_payment_action(true, Some(PaymentCycle::Renewal), true, true),
            PaymentAction::SkipRedelivery
        );
        assert_eq!(
            plan_payment_action(true, None, false, false),
            PaymentAction::SkipRedelivery
        );
    }

    #[test]
    fn fresh_payment_is_recorded_with_its_classification() {
        assert_eq!(
            plan_payment_action(false, None, false, false),
            PaymentAction::Record(PaymentType::OneTime)
        );
        assert_eq!(
            plan_payment_action(false, None, true, true),
            PaymentAction::Record(PaymentType::SubscriptionRenewal)
        );
        assert_eq!(
            plan_payment_action(false, Some(PaymentCycle::Create), true, false),
            PaymentAction::Record(PaymentType::SubscriptionCreate)
        );
    }

    #[test]
    fn redelivered_subscription_creation_is_already_applied() {
        assert!(already_applied(&Some(())));
        assert!(!already_applied::<()>(&None));
    }

    #[test]
    fn subscription_grants_expire_at_period_end() {
        let period_end = datetime!(2026-09-01 00:00:00 UTC);
        let now = datetime!(2026-08-15 12:00:00 UTC);
        assert_eq!(
            grant_expiry(
                PaymentType::SubscriptionRenewal,
                Some(period_end),
                Some(30),
                now
            ),
            Some(period_end)
        );
        // No period end known means the grant does not expire
        assert_eq!(
            grant_expiry(PaymentType::SubscriptionCreate, None, Some(30), now),
            None
        );
    }

    #[test]
    fn one_time_grants_expire_after_plan_days() {
        let now = datetime!(2026-08-15 12:00:00 UTC);
        assert_eq!(
            grant_expiry(PaymentType::OneTime, None, Some(90), now),
            Some(now + Duration::days(90))
        );
        assert_eq!(grant_expiry(PaymentType::OneTime, None, None, now), None);
    }

    #[test]
    fn events_missing_required_details_are_invalid() {
        let event = WebhookEvent {
            kind: WebhookEventKind::PaymentSucceeded,
            provider_event_id: None,
            payment: None,
            subscription: None,
        };
        assert!(matches!(
            required_payment(&event),
            Err(PaymentError::InvalidPayload(_))
        ));
        assert!(matches!(
            required_subscription(&event),
            Err(PaymentError::InvalidPayload(_))
        ));
    }
}
