//! Runtime settings store
//!
//! Key/value settings persisted in the `app_settings` table. Values are
//! editable from the admin console at runtime, so every lookup goes to the
//! database; nothing here is cached in-process.

use sqlx::PgPool;

/// Whether the daily login bonus is enabled ("true"/"false")
pub const DAILY_BONUS_ENABLED: &str = "credits.daily_bonus_enabled";
/// Daily login bonus amount in credits
pub const DAILY_BONUS_AMOUNT: &str = "credits.daily_bonus_amount";
/// Whether users without a paid plan may purchase credit packs
pub const FREE_USER_PURCHASE_ALLOWED: &str = "credits.free_user_purchase_allowed";

/// Reads runtime settings from the `app_settings` table
#[derive(Clone)]
pub struct SettingsStore {
    pool: PgPool,
}

impl SettingsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Raw setting value, `None` when the key has never been set
    pub async fn get(&self, key: &str) -> Result<Option<String>, sqlx::Error> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM app_settings WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(v,)| v))
    }

    /// Boolean setting, defaulting to `false` when unset or unparseable
    pub async fn get_bool(&self, key: &str) -> Result<bool, sqlx::Error> {
        self.get_bool_or(key, false).await
    }

    /// Boolean setting with an explicit default for keys that were never
    /// set
    pub async fn get_bool_or(&self, key: &str, default: bool) -> Result<bool, sqlx::Error> {
        Ok(self
            .get(key)
            .await?
            .map(|v| matches!(v.trim(), "true" | "1" | "on"))
            .unwrap_or(default))
    }

    /// Integer setting, defaulting to 0 when unset or unparseable
    pub async fn get_i32(&self, key: &str) -> Result<i32, sqlx::Error> {
        Ok(self
            .get(key)
            .await?
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0))
    }

    /// Upsert a setting value
    pub async fn set(&self, key: &str, value: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO app_settings (key, value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
