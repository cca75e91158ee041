//! Credit accounting engine
//!
//! Balance computation, grants, the time-gated daily bonus and
//! FIFO-priority consumption. This is the only component that writes to
//! the credit ledger; the webhook pipeline and the admin console both go
//! through it.
//!
//! Failure policy is deliberately asymmetric: consumption errors always
//! propagate (insufficient funds must be actionable by the caller), while
//! grants and balance reads degrade according to [`GrantMode`] and the
//! never-break-the-dashboard rule on `get_user_credits`.

use std::sync::Arc;

use sqlx::{PgConnection, PgPool};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use saasbase_shared::{SettingsStore, DAILY_BONUS_AMOUNT, DAILY_BONUS_ENABLED};

use crate::clock::{Clock, SystemClock};
use crate::error::{LedgerError, LedgerResult};
use crate::model::{
    CreditBalance, CreditHistoryPage, CreditTransaction, CreditsType, NewCreditTransaction,
    TransactionType,
};
use crate::planner::plan_consumption;
use crate::store::CreditStore;

/// Strict wall-clock gate between daily bonus grants
const DAILY_BONUS_WINDOW: Duration = Duration::hours(24);

/// How grant failures surface to callers.
///
/// The historical behavior is best-effort: a failed grant is logged and
/// swallowed so it cannot break the surrounding flow. Strict mode
/// propagates instead, trading availability for financial correctness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GrantMode {
    #[default]
    BestEffort,
    Strict,
}

/// Parameters for a credit grant
#[derive(Debug, Clone)]
pub struct GrantCredits {
    pub user_id: Uuid,
    /// Positive amount; grants are additions by contract
    pub credits: i32,
    pub credits_type: CreditsType,
    pub payment_id: Option<Uuid>,
    pub expires_at: Option<OffsetDateTime>,
    pub description: Option<String>,
}

/// Parameters for a credit consumption
#[derive(Debug, Clone)]
pub struct ConsumeCredits {
    pub user_id: Uuid,
    pub credits: i32,
    pub credits_type: CreditsType,
    pub description: Option<String>,
}

/// Result of a successful consumption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeOutcome {
    /// Balance remaining across all valid rows after the consumption
    pub remaining_credits: i64,
    /// `transaction_id` of the audit debit row
    pub transaction_id: String,
}

pub struct CreditService {
    pool: PgPool,
    settings: SettingsStore,
    grant_mode: GrantMode,
    clock: Arc<dyn Clock>,
}

impl CreditService {
    pub fn new(pool: PgPool, settings: SettingsStore) -> Self {
        Self {
            pool,
            settings,
            grant_mode: GrantMode::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_grant_mode(mut self, mode: GrantMode) -> Self {
        self.grant_mode = mode;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn grant_mode(&self) -> GrantMode {
        self.grant_mode
    }

    /// Balance breakdown for dashboards.
    ///
    /// Never fails: any internal error is logged and a zeroed balance is
    /// returned so the dashboard keeps rendering.
    pub async fn get_user_credits(&self, user_id: Uuid) -> CreditBalance {
        match self.get_user_credits_inner(user_id).await {
            Ok(balance) => balance,
            Err(e) => {
                tracing::error!(
                    user_id = %user_id,
                    error = %e,
                    "Failed to load credit balance, returning zeroed result"
                );
                CreditBalance::zero()
            }
        }
    }

    async fn get_user_credits_inner(&self, user_id: Uuid) -> LedgerResult<CreditBalance> {
        // Grant any bonus that just became due so the read reflects it
        self.try_grant_daily_bonus(user_id).await;

        let now = self.clock.now();
        let (valid, latest_bonus) = tokio::join!(
            CreditStore::valid_credits(&self.pool, user_id, now),
            CreditStore::latest_daily_bonus(&self.pool, user_id),
        );
        let valid = valid?;
        let latest_bonus = latest_bonus?;

        let (daily_bonus_credits, user_credits) = valid
            .iter()
            .map(|row| (row.is_daily_bonus(), row.credits as i64))
            .fold((0i64, 0i64), |(bonus, other), (is_bonus, credits)| {
                if is_bonus {
                    (bonus + credits, other)
                } else {
                    (bonus, other + credits)
                }
            });

        let bonus_enabled = self.settings.get_bool(DAILY_BONUS_ENABLED).await?;
        let next_refresh_time = match (&latest_bonus, bonus_enabled) {
            (Some(bonus), true) => Some(bonus.created_at + DAILY_BONUS_WINDOW),
            _ => None,
        };

        Ok(CreditBalance {
            user_credits,
            daily_bonus_credits,
            next_refresh_time,
        })
    }

    /// Grant the daily login bonus if it is due.
    ///
    /// Idempotent per strict 24h wall-clock window; failures are logged
    /// and never thrown. Returns whether a bonus was granted.
    pub async fn try_grant_daily_bonus(&self, user_id: Uuid) -> bool {
        match self.try_grant_daily_bonus_inner(user_id).await {
            Ok(granted) => granted,
            Err(e) => {
                tracing::warn!(
                    user_id = %user_id,
                    error = %e,
                    "Daily bonus grant failed"
                );
                false
            }
        }
    }

    async fn try_grant_daily_bonus_inner(&self, user_id: Uuid) -> LedgerResult<bool> {
        let enabled = self.settings.get_bool(DAILY_BONUS_ENABLED).await?;
        if !enabled {
            return Ok(false);
        }
        let amount = self.settings.get_i32(DAILY_BONUS_AMOUNT).await?;
        if amount <= 0 {
            return Ok(false);
        }

        let latest = CreditStore::latest_daily_bonus(&self.pool, user_id).await?;
        let now = self.clock.now();
        if !bonus_due(latest.as_ref().map(|b| b.created_at), now) {
            return Ok(false);
        }

        let granted = CreditStore::insert(
            &self.pool,
            &NewCreditTransaction {
                user_id,
                payment_id: None,
                transaction_type: TransactionType::Credit,
                credits_type: CreditsType::DailyBonus,
                credits: amount,
                description: Some("Daily login bonus".to_string()),
                expires_at: Some(now + DAILY_BONUS_WINDOW),
            },
            now,
        )
        .await?;

        tracing::info!(
            user_id = %user_id,
            transaction_id = %granted.transaction_id,
            amount = amount,
            "Granted daily bonus"
        );
        Ok(true)
    }

    /// Grant credits on the service's own connection.
    ///
    /// In [`GrantMode::BestEffort`] a failure is logged and swallowed; in
    /// strict mode it propagates.
    pub async fn increase_credits(&self, params: GrantCredits) -> LedgerResult<()> {
        let result = self.grant(&self.pool, &params).await;
        match (result, self.grant_mode) {
            (Ok(txn), _) => {
                tracing::info!(
                    user_id = %params.user_id,
                    transaction_id = %txn.transaction_id,
                    credits = params.credits,
                    credits_type = %params.credits_type,
                    "Granted credits"
                );
                Ok(())
            }
            (Err(e), GrantMode::BestEffort) => {
                tracing::error!(
                    user_id = %params.user_id,
                    credits = params.credits,
                    credits_type = %params.credits_type,
                    error = %e,
                    "Credit grant failed (best-effort mode, swallowed)"
                );
                Ok(())
            }
            (Err(e), GrantMode::Strict) => Err(e),
        }
    }

    /// Grant credits inside a caller-owned transaction.
    ///
    /// Always propagates; the caller applies its own [`GrantMode`] policy
    /// (the webhook pipeline does this so a strict-mode failure aborts the
    /// whole event transaction).
    pub async fn increase_credits_in_tx(
        &self,
        conn: &mut PgConnection,
        params: &GrantCredits,
    ) -> LedgerResult<CreditTransaction> {
        self.grant(&mut *conn, params).await
    }

    async fn grant<'e>(
        &self,
        exec: impl sqlx::PgExecutor<'e>,
        params: &GrantCredits,
    ) -> LedgerResult<CreditTransaction> {
        CreditStore::insert(
            exec,
            &NewCreditTransaction {
                user_id: params.user_id,
                payment_id: params.payment_id,
                transaction_type: TransactionType::Credit,
                credits_type: params.credits_type,
                credits: params.credits,
                description: params.description.clone(),
                expires_at: params.expires_at,
            },
            self.clock.now(),
        )
        .await
    }

    /// Consume credits in FIFO-priority order.
    ///
    /// Runs in one transaction with the candidate rows locked; errors
    /// propagate (insufficient funds must reach the caller).
    pub async fn decrease_credits(&self, params: ConsumeCredits) -> LedgerResult<ConsumeOutcome> {
        // Caller-contract violation, rejected before any I/O
        if params.credits <= 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let mut tx = self.pool.begin().await?;
        let outcome = self.decrease_credits_in_tx(&mut tx, &params).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    /// Consumption body, composable into a caller-owned transaction
    pub async fn decrease_credits_in_tx(
        &self,
        conn: &mut PgConnection,
        params: &ConsumeCredits,
    ) -> LedgerResult<ConsumeOutcome> {
        let now = self.clock.now();
        let rows = CreditStore::valid_credits_for_update(conn, params.user_id, now).await?;
        let plan = plan_consumption(&rows, params.credits)?;

        for slice in &plan.slices {
            CreditStore::update_balance(&mut *conn, slice.row_id, slice.remaining_after).await?;
        }

        let description = params
            .description
            .clone()
            .unwrap_or_else(|| plan.summary());

        let debit = CreditStore::insert(
            &mut *conn,
            &NewCreditTransaction {
                user_id: params.user_id,
                payment_id: None,
                transaction_type: TransactionType::Debit,
                credits_type: params.credits_type,
                credits: -params.credits,
                description: Some(description),
                expires_at: None,
            },
            now,
        )
        .await?;

        let remaining_credits = plan.total_available - params.credits as i64;
        tracing::info!(
            user_id = %params.user_id,
            transaction_id = %debit.transaction_id,
            consumed = params.credits,
            remaining = remaining_credits,
            "Consumed credits"
        );

        Ok(ConsumeOutcome {
            remaining_credits,
            transaction_id: debit.transaction_id,
        })
    }

    /// Paginated ledger history for history/table UIs
    pub async fn get_user_credits_history(
        &self,
        user_id: Uuid,
        page: u32,
        limit: u32,
        days: Option<u32>,
    ) -> LedgerResult<CreditHistoryPage> {
        CreditStore::history(&self.pool, user_id, page, limit, days, self.clock.now()).await
    }
}

/// Whether a new daily bonus is due given the latest bonus timestamp.
///
/// Strict wall-clock interval, not calendar-day boundary: a grant at
/// 23:59 still blocks a request at 00:01 the next day.
fn bonus_due(latest_created_at: Option<OffsetDateTime>, now: OffsetDateTime) -> bool {
    match latest_created_at {
        None => true,
        Some(created_at) => now - created_at >= DAILY_BONUS_WINDOW,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn lazy_service() -> CreditService {
        // connect_lazy never opens a socket; queries fail at use, which is
        // exactly what the degradation tests need
        let pool = PgPool::connect_lazy("postgres://localhost:1/unreachable")
            .expect("lazy pool construction is infallible");
        let settings = SettingsStore::new(pool.clone());
        CreditService::new(pool, settings)
    }

    #[test]
    fn bonus_due_without_prior_grant() {
        assert!(bonus_due(None, datetime!(2025-01-01 00:00:00 UTC)));
    }

    #[test]
    fn bonus_blocked_within_24h_even_across_midnight() {
        let granted_at = datetime!(2025-01-01 23:59:00 UTC);
        let next_morning = datetime!(2025-01-02 00:01:00 UTC);
        assert!(!bonus_due(Some(granted_at), next_morning));
    }

    #[test]
    fn bonus_due_at_exactly_24h() {
        let granted_at = datetime!(2025-01-01 09:30:00 UTC);
        assert!(!bonus_due(
            Some(granted_at),
            datetime!(2025-01-02 09:29:59 UTC)
        ));
        assert!(bonus_due(
            Some(granted_at),
            datetime!(2025-01-02 09:30:00 UTC)
        ));
    }

    #[test]
    fn manual_clock_advances_past_the_gate() {
        let clock = crate::clock::test_support::ManualClock::new(datetime!(
            2025-01-01 09:30:00 UTC
        ));
        let granted_at = clock.now();
        clock.advance(Duration::hours(23));
        assert!(!bonus_due(Some(granted_at), clock.now()));
        clock.advance(Duration::hours(1));
        assert!(bonus_due(Some(granted_at), clock.now()));
    }

    #[tokio::test]
    async fn decrease_rejects_non_positive_amount_before_io() {
        let service = lazy_service();
        for amount in [0, -10] {
            let err = service
                .decrease_credits(ConsumeCredits {
                    user_id: Uuid::new_v4(),
                    credits: amount,
                    credits_type: CreditsType::UsageDebit,
                    description: None,
                })
                .await
                .unwrap_err();
            // InvalidAmount, not a connection error: validation runs first
            assert!(matches!(err, LedgerError::InvalidAmount));
        }
    }

    #[tokio::test]
    async fn balance_read_degrades_to_zero_on_store_failure() {
        let service = lazy_service();
        let balance = service.get_user_credits(Uuid::new_v4()).await;
        assert_eq!(balance, CreditBalance::zero());
    }

    #[tokio::test]
    async fn best_effort_grant_swallows_store_failure() {
        let service = lazy_service();
        let result = service
            .increase_credits(GrantCredits {
                user_id: Uuid::new_v4(),
                credits: 100,
                credits_type: CreditsType::AdminGrant,
                payment_id: None,
                expires_at: None,
                description: None,
            })
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn strict_grant_propagates_store_failure() {
        let service = lazy_service().with_grant_mode(GrantMode::Strict);
        let result = service
            .increase_credits(GrantCredits {
                user_id: Uuid::new_v4(),
                credits: 100,
                credits_type: CreditsType::AdminGrant,
                payment_id: None,
                expires_at: None,
                description: None,
            })
            .await;
        assert!(matches!(result, Err(LedgerError::Database(_))));
    }

    #[tokio::test]
    async fn daily_bonus_failure_is_swallowed() {
        let service = lazy_service();
        // Settings lookup fails on the unreachable pool; must not panic or
        // report a grant
        assert!(!service.try_grant_daily_bonus(Uuid::new_v4()).await);
    }
}
