//! Environment configuration
//!
//! Parsed once at startup into a plain struct; nothing reads the
//! environment after boot. Provider credentials are optional so a
//! deployment can run with any subset of providers configured.

use anyhow::Context;

use saasbase_ledger::GrantMode;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    /// Path to the plan catalog JSON; empty catalog when unset
    pub plan_catalog_path: Option<String>,
    pub grant_mode: GrantMode,
    pub checkout_success_url: String,
    pub checkout_cancel_url: String,
    pub stripe: Option<StripeEnv>,
    pub creem: Option<CreemEnv>,
}

#[derive(Debug, Clone)]
pub struct StripeEnv {
    pub secret_key: String,
    pub webhook_secret: String,
}

#[derive(Debug, Clone)]
pub struct CreemEnv {
    pub api_key: String,
    pub webhook_secret: String,
    pub api_base: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let grant_mode = match std::env::var("CREDIT_GRANT_MODE").as_deref() {
            Ok("strict") => GrantMode::Strict,
            Ok("best_effort") | Err(_) => GrantMode::BestEffort,
            Ok(other) => anyhow::bail!("invalid CREDIT_GRANT_MODE: {other}"),
        };

        let stripe = match (
            std::env::var("STRIPE_SECRET_KEY"),
            std::env::var("STRIPE_WEBHOOK_SECRET"),
        ) {
            (Ok(secret_key), Ok(webhook_secret)) => Some(StripeEnv {
                secret_key,
                webhook_secret,
            }),
            _ => None,
        };

        let creem = match (
            std::env::var("CREEM_API_KEY"),
            std::env::var("CREEM_WEBHOOK_SECRET"),
        ) {
            (Ok(api_key), Ok(webhook_secret)) => Some(CreemEnv {
                api_key,
                webhook_secret,
                api_base: std::env::var("CREEM_API_BASE").ok(),
            }),
            _ => None,
        };

        Ok(Self {
            database_url,
            bind_address,
            plan_catalog_path: std::env::var("PLAN_CATALOG_PATH").ok(),
            grant_mode,
            checkout_success_url: std::env::var("CHECKOUT_SUCCESS_URL")
                .unwrap_or_else(|_| "http://localhost:3000/checkout/success".to_string()),
            checkout_cancel_url: std::env::var("CHECKOUT_CANCEL_URL")
                .unwrap_or_else(|_| "http://localhost:3000/pricing".to_string()),
            stripe,
            creem,
        })
    }
}
