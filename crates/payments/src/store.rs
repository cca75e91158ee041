//! Payment and subscription record stores
//!
//! Rows are keyed by the provider's external ids (`provider_payment_id`,
//! `provider_subscription_id`); those unique columns are what makes the
//! webhook pipeline idempotent under redelivery. Rows are created by the
//! reconciliation pipeline and mutated only by it; nothing is hard-deleted
//! in the normal flow.

use serde::Serialize;
use sqlx::PgExecutor;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::PaymentResult;
use crate::event::ProviderKey;

/// Payment classification derived from the normalized event's cycle type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    SubscriptionCreate,
    SubscriptionRenewal,
    OneTime,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::SubscriptionCreate => "subscription_create",
            PaymentType::SubscriptionRenewal => "subscription_renewal",
            PaymentType::OneTime => "one_time",
        }
    }

    pub fn is_subscription(&self) -> bool {
        !matches!(self, PaymentType::OneTime)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub provider: String,
    pub provider_payment_id: String,
    pub provider_invoice_id: Option<String>,
    pub user_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub payment_type: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: String,
    pub plan_id: Option<String>,
    pub price_id: Option<String>,
    pub refunded_at: Option<OffsetDateTime>,
    pub refund_amount_cents: Option<i64>,
    pub metadata: serde_json::Value,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub provider: ProviderKey,
    pub provider_payment_id: String,
    pub provider_invoice_id: Option<String>,
    pub user_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub payment_type: PaymentType,
    pub amount_cents: i64,
    pub currency: String,
    pub status: String,
    pub plan_id: Option<String>,
    pub price_id: Option<String>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SubscriptionRecord {
    pub id: Uuid,
    pub provider: String,
    pub provider_subscription_id: String,
    pub provider_customer_id: Option<String>,
    pub user_id: Uuid,
    pub plan_id: Option<String>,
    pub price_id: Option<String>,
    pub status: String,
    pub billing_interval: Option<String>,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<OffsetDateTime>,
    pub cancel_reason: Option<String>,
    pub trial_start: Option<OffsetDateTime>,
    pub trial_end: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub provider: ProviderKey,
    pub provider_subscription_id: String,
    pub provider_customer_id: Option<String>,
    pub user_id: Uuid,
    pub plan_id: Option<String>,
    pub price_id: Option<String>,
    pub status: String,
    pub billing_interval: Option<String>,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
    pub trial_start: Option<OffsetDateTime>,
    pub trial_end: Option<OffsetDateTime>,
}

pub struct PaymentStore;

impl PaymentStore {
    pub async fn find_by_provider_payment_id(
        exec: impl PgExecutor<'_>,
        provider_payment_id: &str,
    ) -> PaymentResult<Option<PaymentRecord>> {
        let row = sqlx::query_as::<_, PaymentRecord>(
            "SELECT * FROM payments WHERE provider_payment_id = $1",
        )
        .bind(provider_payment_id)
        .fetch_optional(exec)
        .await?;
        Ok(row)
    }

    pub async fn insert(
        exec: impl PgExecutor<'_>,
        new: &NewPayment,
    ) -> PaymentResult<PaymentRecord> {
        let row = sqlx::query_as::<_, PaymentRecord>(
            r#"
            INSERT INTO payments
                (id, provider, provider_payment_id, provider_invoice_id, user_id,
                 subscription_id, payment_type, amount_cents, currency, status,
                 plan_id, price_id, metadata, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.provider.as_str())
        .bind(&new.provider_payment_id)
        .bind(new.provider_invoice_id.as_deref())
        .bind(new.user_id)
        .bind(new.subscription_id)
        .bind(new.payment_type.as_str())
        .bind(new.amount_cents)
        .bind(&new.currency)
        .bind(&new.status)
        .bind(new.plan_id.as_deref())
        .bind(new.price_id.as_deref())
        .bind(&new.metadata)
        .fetch_one(exec)
        .await?;
        Ok(row)
    }

    /// Whether any payment is already recorded for a subscription. Used to
    /// tell a first charge from a renewal when the provider's event does
    /// not say.
    pub async fn exists_for_subscription(
        exec: impl PgExecutor<'_>,
        subscription_id: Uuid,
    ) -> PaymentResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM payments WHERE subscription_id = $1)")
                .bind(subscription_id)
                .fetch_one(exec)
                .await?;
        Ok(exists)
    }

    /// Record a refund against an existing payment. Returns the number of
    /// rows updated (0 when the payment is unknown).
    pub async fn mark_refunded(
        exec: impl PgExecutor<'_>,
        provider_payment_id: &str,
        status: &str,
        refund_amount_cents: Option<i64>,
        refunded_at: OffsetDateTime,
    ) -> PaymentResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = $1,
                refunded_at = $2,
                refund_amount_cents = $3,
                updated_at = NOW()
            WHERE provider_payment_id = $4
            "#,
        )
        .bind(status)
        .bind(refunded_at)
        .bind(refund_amount_cents)
        .bind(provider_payment_id)
        .execute(exec)
        .await?;
        Ok(result.rows_affected())
    }
}

pub struct SubscriptionStore;

impl SubscriptionStore {
    pub async fn find_by_provider_subscription_id(
        exec: impl PgExecutor<'_>,
        provider_subscription_id: &str,
    ) -> PaymentResult<Option<SubscriptionRecord>> {
        let row = sqlx::query_as::<_, SubscriptionRecord>(
            "SELECT * FROM subscriptions WHERE provider_subscription_id = $1",
        )
        .bind(provider_subscription_id)
        .fetch_optional(exec)
        .await?;
        Ok(row)
    }

    /// Whether the user currently holds an active subscription. Gates
    /// one-time purchases when free-user purchasing is disabled.
    pub async fn has_active_for_user(
        exec: impl PgExecutor<'_>,
        user_id: Uuid,
    ) -> PaymentResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM subscriptions WHERE user_id = $1 AND status = 'active')",
        )
        .bind(user_id)
        .fetch_one(exec)
        .await?;
        Ok(exists)
    }

    pub async fn insert(
        exec: impl PgExecutor<'_>,
        new: &NewSubscription,
    ) -> PaymentResult<SubscriptionRecord> {
        let row = sqlx::query_as::<_, SubscriptionRecord>(
            r#"
            INSERT INTO subscriptions
                (id, provider, provider_subscription_id, provider_customer_id, user_id,
                 plan_id, price_id, status, billing_interval,
                 current_period_start, current_period_end, trial_start, trial_end,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.provider.as_str())
        .bind(&new.provider_subscription_id)
        .bind(new.provider_customer_id.as_deref())
        .bind(new.user_id)
        .bind(new.plan_id.as_deref())
        .bind(new.price_id.as_deref())
        .bind(&new.status)
        .bind(new.billing_interval.as_deref())
        .bind(new.current_period_start)
        .bind(new.current_period_end)
        .bind(new.trial_start)
        .bind(new.trial_end)
        .fetch_one(exec)
        .await?;
        Ok(row)
    }

    /// Roll the subscription forward into a new billing period (renewal
    /// payments) and refresh its status
    pub async fn update_period(
        exec: impl PgExecutor<'_>,
        provider_subscription_id: &str,
        status: &str,
        period_start: Option<OffsetDateTime>,
        period_end: Option<OffsetDateTime>,
    ) -> PaymentResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = $1,
                current_period_start = COALESCE($2, current_period_start),
                current_period_end = COALESCE($3, current_period_end),
                updated_at = NOW()
            WHERE provider_subscription_id = $4
            "#,
        )
        .bind(status)
        .bind(period_start)
        .bind(period_end)
        .bind(provider_subscription_id)
        .execute(exec)
        .await?;
        Ok(result.rows_affected())
    }

    /// Full state refresh from a `subscription.updated` event. Update-only:
    /// returns 0 rows for unknown subscriptions, never inserts.
    #[allow(clippy::too_many_arguments)]
    pub async fn update_state(
        exec: impl PgExecutor<'_>,
        provider_subscription_id: &str,
        status: &str,
        price_id: Option<&str>,
        period_start: Option<OffsetDateTime>,
        period_end: Option<OffsetDateTime>,
        cancel_at_period_end: bool,
        trial_start: Option<OffsetDateTime>,
        trial_end: Option<OffsetDateTime>,
    ) -> PaymentResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = $1,
                price_id = COALESCE($2, price_id),
                current_period_start = COALESCE($3, current_period_start),
                current_period_end = COALESCE($4, current_period_end),
                cancel_at_period_end = $5,
                trial_start = COALESCE($6, trial_start),
                trial_end = COALESCE($7, trial_end),
                updated_at = NOW()
            WHERE provider_subscription_id = $8
            "#,
        )
        .bind(status)
        .bind(price_id)
        .bind(period_start)
        .bind(period_end)
        .bind(cancel_at_period_end)
        .bind(trial_start)
        .bind(trial_end)
        .bind(provider_subscription_id)
        .execute(exec)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn mark_canceled(
        exec: impl PgExecutor<'_>,
        provider_subscription_id: &str,
        canceled_at: OffsetDateTime,
        cancel_reason: Option<&str>,
    ) -> PaymentResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'canceled',
                cancel_at_period_end = TRUE,
                canceled_at = $1,
                cancel_reason = $2,
                updated_at = NOW()
            WHERE provider_subscription_id = $3
            "#,
        )
        .bind(canceled_at)
        .bind(cancel_reason)
        .bind(provider_subscription_id)
        .execute(exec)
        .await?;
        Ok(result.rows_affected())
    }
}
