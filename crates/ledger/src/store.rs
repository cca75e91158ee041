//! Credit ledger store
//!
//! Thin persistence layer over the `credits` table. Every mutating
//! operation takes an explicit executor so callers can compose it into a
//! larger transaction (the accounting engine and the webhook pipeline both
//! do); nothing here opens its own transaction.

use sqlx::{PgConnection, PgExecutor, PgPool};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::model::{
    CreditHistoryPage, CreditTransaction, CreditsType, NewCreditTransaction, TransactionType,
};

const RETURNING_COLUMNS: &str = "id, transaction_id, user_id, payment_id, transaction_type, \
     credits_type, credits, description, expires_at, created_at";

/// Raw row shape; decoded into [`CreditTransaction`] at the boundary
#[derive(Debug, sqlx::FromRow)]
struct CreditRow {
    id: Uuid,
    transaction_id: String,
    user_id: Uuid,
    payment_id: Option<Uuid>,
    transaction_type: String,
    credits_type: String,
    credits: i32,
    description: Option<String>,
    expires_at: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
}

impl TryFrom<CreditRow> for CreditTransaction {
    type Error = LedgerError;

    fn try_from(row: CreditRow) -> Result<Self, Self::Error> {
        let transaction_type = TransactionType::parse(&row.transaction_type).ok_or_else(|| {
            LedgerError::CorruptRow {
                id: row.id,
                reason: format!("unknown transaction_type '{}'", row.transaction_type),
            }
        })?;
        Ok(CreditTransaction {
            id: row.id,
            transaction_id: row.transaction_id,
            user_id: row.user_id,
            payment_id: row.payment_id,
            transaction_type,
            credits_type: row.credits_type,
            credits: row.credits,
            description: row.description,
            expires_at: row.expires_at,
            created_at: row.created_at,
        })
    }
}

fn decode_rows(rows: Vec<CreditRow>) -> LedgerResult<Vec<CreditTransaction>> {
    rows.into_iter().map(CreditTransaction::try_from).collect()
}

/// Query/mutation surface for the `credits` table
pub struct CreditStore;

impl CreditStore {
    /// Persist a new ledger entry, assigning `id`, `transaction_id` and
    /// `created_at`
    pub async fn insert(
        exec: impl PgExecutor<'_>,
        new: &NewCreditTransaction,
        now: OffsetDateTime,
    ) -> LedgerResult<CreditTransaction> {
        let row: CreditRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO credits
                (id, transaction_id, user_id, payment_id, transaction_type,
                 credits_type, credits, description, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {RETURNING_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(format!("txn_{}", Uuid::new_v4().simple()))
        .bind(new.user_id)
        .bind(new.payment_id)
        .bind(new.transaction_type.as_str())
        .bind(new.credits_type.as_str())
        .bind(new.credits)
        .bind(new.description.as_deref())
        .bind(new.expires_at)
        .bind(now)
        .fetch_one(exec)
        .await?;

        row.try_into()
    }

    /// All credit-type rows for `user_id` that are not expired at `now`,
    /// soonest-to-expire first, permanent rows last
    pub async fn valid_credits(
        exec: impl PgExecutor<'_>,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> LedgerResult<Vec<CreditTransaction>> {
        let rows: Vec<CreditRow> = sqlx::query_as(&format!(
            r#"
            SELECT {RETURNING_COLUMNS}
            FROM credits
            WHERE user_id = $1
              AND transaction_type = 'credit'
              AND (expires_at IS NULL OR expires_at >= $2)
            ORDER BY expires_at ASC NULLS LAST, created_at ASC
            "#
        ))
        .bind(user_id)
        .bind(now)
        .fetch_all(exec)
        .await?;

        decode_rows(rows)
    }

    /// Same as [`valid_credits`](Self::valid_credits) but locks the
    /// selected rows for the duration of the surrounding transaction.
    ///
    /// Consumption must use this variant: without the row locks two
    /// concurrent spends can both read the same balance and double-spend
    /// it.
    pub async fn valid_credits_for_update(
        conn: &mut PgConnection,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> LedgerResult<Vec<CreditTransaction>> {
        let rows: Vec<CreditRow> = sqlx::query_as(&format!(
            r#"
            SELECT {RETURNING_COLUMNS}
            FROM credits
            WHERE user_id = $1
              AND transaction_type = 'credit'
              AND (expires_at IS NULL OR expires_at >= $2)
            ORDER BY expires_at ASC NULLS LAST, created_at ASC
            FOR UPDATE
            "#
        ))
        .bind(user_id)
        .bind(now)
        .fetch_all(&mut *conn)
        .await?;

        decode_rows(rows)
    }

    /// Most recent daily-bonus grant for the user, if any
    pub async fn latest_daily_bonus(
        exec: impl PgExecutor<'_>,
        user_id: Uuid,
    ) -> LedgerResult<Option<CreditTransaction>> {
        let row: Option<CreditRow> = sqlx::query_as(&format!(
            r#"
            SELECT {RETURNING_COLUMNS}
            FROM credits
            WHERE user_id = $1
              AND transaction_type = 'credit'
              AND credits_type = $2
            ORDER BY created_at DESC
            LIMIT 1
            "#
        ))
        .bind(user_id)
        .bind(CreditsType::DailyBonus.as_str())
        .fetch_optional(exec)
        .await?;

        row.map(CreditTransaction::try_from).transpose()
    }

    /// Set a credit row's remaining balance (the consumption mechanism)
    pub async fn update_balance(
        exec: impl PgExecutor<'_>,
        row_id: Uuid,
        new_balance: i32,
    ) -> LedgerResult<()> {
        let result = sqlx::query("UPDATE credits SET credits = $1 WHERE id = $2")
            .bind(new_balance)
            .bind(row_id)
            .execute(exec)
            .await?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::CorruptRow {
                id: row_id,
                reason: "balance update matched no row".to_string(),
            });
        }
        Ok(())
    }

    /// Paginated history (credit and debit rows), newest first, optionally
    /// windowed to the last `days` days
    pub async fn history(
        pool: &PgPool,
        user_id: Uuid,
        page: u32,
        limit: u32,
        days: Option<u32>,
        now: OffsetDateTime,
    ) -> LedgerResult<CreditHistoryPage> {
        let page = page.max(1);
        let limit = limit.clamp(1, 100);
        let since = days.map(|d| now - Duration::days(d as i64));

        let (total,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM credits
            WHERE user_id = $1
              AND ($2::timestamptz IS NULL OR created_at >= $2)
            "#,
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(pool)
        .await?;

        let rows: Vec<CreditRow> = sqlx::query_as(&format!(
            r#"
            SELECT {RETURNING_COLUMNS}
            FROM credits
            WHERE user_id = $1
              AND ($2::timestamptz IS NULL OR created_at >= $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#
        ))
        .bind(user_id)
        .bind(since)
        .bind(limit as i64)
        .bind(((page - 1) as i64) * limit as i64)
        .fetch_all(pool)
        .await?;

        let items = decode_rows(rows)?;
        let has_more = (page as i64) * (limit as i64) < total;

        Ok(CreditHistoryPage {
            items,
            total,
            page,
            limit,
            has_more,
        })
    }
}
