#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Shared infrastructure for the SaaSBase backend
//!
//! Database pool construction, migrations, the runtime settings store and
//! the static plan catalog. Everything here is constructed once at process
//! start and passed by reference; no module-level lazy singletons.

pub mod plans;
pub mod settings;

pub use plans::{Plan, PlanCatalog, PlanCredit, PlanPrice, PlanType, PriceType};
pub use settings::{
    SettingsStore, DAILY_BONUS_AMOUNT, DAILY_BONUS_ENABLED, FREE_USER_PURCHASE_ALLOWED,
};

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

/// Create the main database pool used by all request-path queries
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .connect(database_url)
        .await
}

/// Run pending migrations
///
/// Must run against a direct (non-pooler) connection: PgBouncer in
/// transaction mode does not support the prepared statements sqlx's
/// migrator issues.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(pool).await
}
