//! Application state
//!
//! All services are constructed here, once, from the parsed config and
//! the database pool, then shared by value. Handlers receive everything
//! they need through this struct; no module-level singletons.

use std::sync::Arc;

use sqlx::PgPool;

use saasbase_ledger::CreditService;
use saasbase_payments::{
    CreemConfig, CreemProvider, ProviderAdapter, ProviderRegistry, StripeConfig, StripeProvider,
    WebhookProcessor,
};
use saasbase_shared::{PlanCatalog, SettingsStore};

use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub settings: SettingsStore,
    pub credits: Arc<CreditService>,
    pub processor: Arc<WebhookProcessor>,
    pub providers: ProviderRegistry,
    pub catalog: PlanCatalog,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> anyhow::Result<Self> {
        let catalog = match &config.plan_catalog_path {
            Some(path) => {
                let catalog = PlanCatalog::from_json_file(path)?;
                tracing::info!(path = %path, plans = catalog.len(), "Plan catalog loaded");
                catalog
            }
            None => {
                tracing::warn!(
                    "PLAN_CATALOG_PATH not set, payments will not grant credits"
                );
                PlanCatalog::new(Vec::new())?
            }
        };

        let settings = SettingsStore::new(pool.clone());
        let credits = Arc::new(
            CreditService::new(pool.clone(), settings.clone())
                .with_grant_mode(config.grant_mode),
        );

        let mut providers = ProviderRegistry::new();
        if let Some(stripe) = &config.stripe {
            providers = providers.register(ProviderAdapter::Stripe(StripeProvider::new(
                StripeConfig {
                    secret_key: stripe.secret_key.clone(),
                    webhook_secret: stripe.webhook_secret.clone(),
                },
            )));
            tracing::info!("Stripe provider configured");
        }
        if let Some(creem) = &config.creem {
            let mut creem_config =
                CreemConfig::new(creem.api_key.clone(), creem.webhook_secret.clone());
            if let Some(base) = &creem.api_base {
                creem_config.api_base = base.clone();
            }
            providers =
                providers.register(ProviderAdapter::Creem(CreemProvider::new(creem_config)));
            tracing::info!("Creem provider configured");
        }
        if providers.is_empty() {
            tracing::warn!("No payment providers configured, webhook endpoint will reject all deliveries");
        }

        let processor = Arc::new(WebhookProcessor::new(
            pool.clone(),
            credits.clone(),
            catalog.clone(),
        ));

        Ok(Self {
            pool,
            config,
            settings,
            credits,
            processor,
            providers,
            catalog,
        })
    }
}
