//! Consumption planning
//!
//! Pure allocation logic for `decrease_credits`, separated from the store
//! so the ordering and boundary rules are unit-testable without a
//! database.
//!
//! Policy: spend the most perishable, least valuable credit first. Daily
//! bonus rows always come first (they are the most perishable by
//! construction, 24h), then all other rows soonest-to-expire first with
//! permanent rows last. Within each group the store's
//! `expires_at ASC NULLS LAST` ordering is preserved.

use time::macros::format_description;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::model::CreditTransaction;

/// One row's share of a consumption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumptionSlice {
    pub row_id: Uuid,
    /// Amount deducted from this row
    pub amount: i32,
    /// Row balance after the deduction
    pub remaining_after: i32,
    pub credits_type: String,
    pub expires_at: Option<OffsetDateTime>,
}

/// Fully-resolved allocation for one consumption request
#[derive(Debug, Clone)]
pub struct ConsumptionPlan {
    pub slices: Vec<ConsumptionSlice>,
    /// Sum of all valid rows before the consumption
    pub total_available: i64,
}

impl ConsumptionPlan {
    /// Human-readable summary used as the audit debit's description when
    /// the caller supplies none, e.g.
    /// `"60 from daily_bonus (exp: 2025-01-02); 40 from one_time_payment"`
    pub fn summary(&self) -> String {
        let date_only = format_description!("[year]-[month]-[day]");
        self.slices
            .iter()
            .map(|slice| match slice.expires_at {
                Some(exp) => format!(
                    "{} from {} (exp: {})",
                    slice.amount,
                    slice.credits_type,
                    exp.format(&date_only)
                        .unwrap_or_else(|_| exp.to_string())
                ),
                None => format!("{} from {}", slice.amount, slice.credits_type),
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Build the allocation for consuming `amount` credits from `rows`.
///
/// `rows` must be the user's valid (non-expired) credit rows in the
/// store's `expires_at ASC NULLS LAST` order. No I/O: validation and
/// insufficiency are decided here, mutation happens at the call site.
pub fn plan_consumption(
    rows: &[CreditTransaction],
    amount: i32,
) -> LedgerResult<ConsumptionPlan> {
    if amount <= 0 {
        return Err(LedgerError::InvalidAmount);
    }
    if rows.is_empty() {
        return Err(LedgerError::InsufficientCredits {
            required: amount as i64,
            available: 0,
        });
    }

    let total_available: i64 = rows.iter().map(|r| r.credits as i64).sum();
    if total_available < amount as i64 {
        return Err(LedgerError::InsufficientCredits {
            required: amount as i64,
            available: total_available,
        });
    }

    // Stable partition keeps the store's expiry ordering inside each group
    let ordered = rows
        .iter()
        .filter(|r| r.is_daily_bonus())
        .chain(rows.iter().filter(|r| !r.is_daily_bonus()));

    let mut remaining = amount;
    let mut slices = Vec::new();
    for row in ordered {
        if remaining == 0 {
            break;
        }
        if row.credits <= 0 {
            // Fully drained rows can linger until expiry; skip them
            continue;
        }
        let take = row.credits.min(remaining);
        slices.push(ConsumptionSlice {
            row_id: row.id,
            amount: take,
            remaining_after: row.credits - take,
            credits_type: row.credits_type.clone(),
            expires_at: row.expires_at,
        });
        remaining -= take;
    }

    debug_assert_eq!(remaining, 0, "allocation must cover the full amount");

    Ok(ConsumptionPlan {
        slices,
        total_available,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CreditsType, TransactionType};
    use time::macros::datetime;

    fn row(
        credits: i32,
        credits_type: CreditsType,
        expires_at: Option<OffsetDateTime>,
    ) -> CreditTransaction {
        CreditTransaction {
            id: Uuid::new_v4(),
            transaction_id: format!("txn_{}", Uuid::new_v4().simple()),
            user_id: Uuid::new_v4(),
            payment_id: None,
            transaction_type: TransactionType::Credit,
            credits_type: credits_type.as_str().to_string(),
            credits,
            description: None,
            expires_at,
            created_at: datetime!(2025-01-01 00:00:00 UTC),
        }
    }

    #[test]
    fn rejects_non_positive_amounts_before_anything_else() {
        let rows = vec![row(100, CreditsType::AdminGrant, None)];
        assert!(matches!(
            plan_consumption(&rows, 0),
            Err(LedgerError::InvalidAmount)
        ));
        assert!(matches!(
            plan_consumption(&rows, -5),
            Err(LedgerError::InvalidAmount)
        ));
    }

    #[test]
    fn empty_ledger_reports_zero_available() {
        let err = plan_consumption(&[], 1).unwrap_err();
        match err {
            LedgerError::InsufficientCredits {
                required,
                available,
            } => {
                assert_eq!(required, 1);
                assert_eq!(available, 0);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn insufficient_total_reports_actual_available() {
        let rows = vec![
            row(30, CreditsType::OneTimePayment, None),
            row(10, CreditsType::DailyBonus, Some(datetime!(2025-01-02 00:00:00 UTC))),
        ];
        let err = plan_consumption(&rows, 41).unwrap_err();
        match err {
            LedgerError::InsufficientCredits {
                required,
                available,
            } => {
                assert_eq!(required, 41);
                assert_eq!(available, 40);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn daily_bonus_is_consumed_before_permanent_credits() {
        // Permanent row created first, bonus afterward; the bonus still
        // goes first.
        let permanent = row(500, CreditsType::SubscriptionPayment, None);
        let bonus = row(
            100,
            CreditsType::DailyBonus,
            Some(datetime!(2025-01-02 00:00:00 UTC)),
        );
        // Store order: expires_at ASC NULLS LAST
        let rows = vec![bonus.clone(), permanent.clone()];

        let plan = plan_consumption(&rows, 60).unwrap();
        assert_eq!(plan.slices.len(), 1);
        assert_eq!(plan.slices[0].row_id, bonus.id);
        assert_eq!(plan.slices[0].amount, 60);
        assert_eq!(plan.slices[0].remaining_after, 40);
    }

    #[test]
    fn daily_bonus_outranks_sooner_explicit_expiry() {
        // A purchased pack expiring slightly before the bonus still loses:
        // bonus credits are always first in line.
        let pack = row(
            50,
            CreditsType::OneTimePayment,
            Some(datetime!(2025-01-01 06:00:00 UTC)),
        );
        let bonus = row(
            20,
            CreditsType::DailyBonus,
            Some(datetime!(2025-01-01 12:00:00 UTC)),
        );
        let rows = vec![pack.clone(), bonus.clone()];

        let plan = plan_consumption(&rows, 30).unwrap();
        assert_eq!(plan.slices[0].row_id, bonus.id);
        assert_eq!(plan.slices[0].amount, 20);
        assert_eq!(plan.slices[1].row_id, pack.id);
        assert_eq!(plan.slices[1].amount, 10);
        assert_eq!(plan.slices[1].remaining_after, 40);
    }

    #[test]
    fn spans_multiple_rows_in_expiry_order() {
        let soon = row(
            25,
            CreditsType::OneTimePayment,
            Some(datetime!(2025-02-01 00:00:00 UTC)),
        );
        let later = row(
            25,
            CreditsType::OneTimePayment,
            Some(datetime!(2025-03-01 00:00:00 UTC)),
        );
        let permanent = row(100, CreditsType::AdminGrant, None);
        let rows = vec![soon.clone(), later.clone(), permanent.clone()];

        let plan = plan_consumption(&rows, 60).unwrap();
        let allocated: Vec<(Uuid, i32)> =
            plan.slices.iter().map(|s| (s.row_id, s.amount)).collect();
        assert_eq!(
            allocated,
            vec![(soon.id, 25), (later.id, 25), (permanent.id, 10)]
        );
    }

    #[test]
    fn exact_balance_consumption_drains_to_zero() {
        let rows = vec![row(50, CreditsType::OneTimePayment, None)];
        let plan = plan_consumption(&rows, 50).unwrap();
        assert_eq!(plan.total_available, 50);
        assert_eq!(plan.slices[0].remaining_after, 0);
    }

    #[test]
    fn drained_rows_are_skipped() {
        let empty = row(0, CreditsType::DailyBonus, Some(datetime!(2025-01-02 00:00:00 UTC)));
        let funded = row(40, CreditsType::OneTimePayment, None);
        let rows = vec![empty, funded.clone()];

        let plan = plan_consumption(&rows, 10).unwrap();
        assert_eq!(plan.slices.len(), 1);
        assert_eq!(plan.slices[0].row_id, funded.id);
    }

    #[test]
    fn allocation_conserves_the_requested_amount() {
        let rows = vec![
            row(7, CreditsType::DailyBonus, Some(datetime!(2025-01-02 00:00:00 UTC))),
            row(13, CreditsType::OneTimePayment, Some(datetime!(2025-02-01 00:00:00 UTC))),
            row(500, CreditsType::SubscriptionPayment, None),
        ];
        let total_before: i64 = rows.iter().map(|r| r.credits as i64).sum();

        let plan = plan_consumption(&rows, 100).unwrap();
        let allocated: i64 = plan.slices.iter().map(|s| s.amount as i64).sum();
        assert_eq!(allocated, 100);
        assert_eq!(plan.total_available, total_before);

        // Untouched rows plus post-deduction balances add back up
        let touched: std::collections::HashSet<Uuid> =
            plan.slices.iter().map(|s| s.row_id).collect();
        let untouched: i64 = rows
            .iter()
            .filter(|r| !touched.contains(&r.id))
            .map(|r| r.credits as i64)
            .sum();
        let after: i64 = plan
            .slices
            .iter()
            .map(|s| s.remaining_after as i64)
            .sum::<i64>()
            + untouched;
        assert_eq!(after, total_before - 100);
    }

    #[test]
    fn summary_names_each_source_with_expiry_dates() {
        let rows = vec![
            row(
                12,
                CreditsType::DailyBonus,
                Some(datetime!(2025-01-02 00:00:00 UTC)),
            ),
            row(50, CreditsType::OneTimePayment, None),
        ];
        let plan = plan_consumption(&rows, 20).unwrap();
        assert_eq!(
            plan.summary(),
            "12 from daily_bonus (exp: 2025-01-02); 8 from one_time_payment"
        );
    }
}
