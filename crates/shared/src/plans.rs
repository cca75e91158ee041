//! Static plan catalog
//!
//! Plans and prices are deployment configuration, not database state: they
//! are loaded once at startup from a JSON file (`PLAN_CATALOG_PATH`) and
//! shared read-only across requests. Price IDs are the provider-assigned
//! identifiers (e.g. Stripe price IDs) so webhook payloads can be mapped
//! back to a plan.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum PlanCatalogError {
    #[error("failed to read plan catalog: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid plan catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("duplicate plan id: {0}")]
    DuplicatePlan(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    Free,
    Subscription,
    OneTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceType {
    Subscription,
    OneTime,
}

/// Credit grant policy attached to a plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanCredit {
    /// Credits granted per successful payment
    pub amount: i32,
    /// Days until one-time credits expire; `None` means they never expire.
    /// Ignored for subscription plans, whose grants expire at period end.
    #[serde(default)]
    pub expire_days: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanPrice {
    /// Provider-assigned price id
    pub price_id: String,
    pub price_type: PriceType,
    /// Billing interval for subscription prices ("month"/"year")
    #[serde(default)]
    pub interval: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub plan_type: PlanType,
    #[serde(default)]
    pub credit: Option<PlanCredit>,
    pub prices: Vec<PlanPrice>,
}

/// Immutable plan lookup table, built once at startup
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    plans: HashMap<String, Plan>,
}

impl PlanCatalog {
    pub fn new(plans: Vec<Plan>) -> Result<Self, PlanCatalogError> {
        let mut map = HashMap::with_capacity(plans.len());
        for plan in plans {
            if map.insert(plan.id.clone(), plan.clone()).is_some() {
                return Err(PlanCatalogError::DuplicatePlan(plan.id));
            }
        }
        Ok(Self { plans: map })
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, PlanCatalogError> {
        let raw = std::fs::read_to_string(path)?;
        let plans: Vec<Plan> = serde_json::from_str(&raw)?;
        Self::new(plans)
    }

    pub fn plan_by_id(&self, plan_id: &str) -> Option<&Plan> {
        self.plans.get(plan_id)
    }

    /// Reverse lookup from a provider price id to its plan
    pub fn plan_by_price_id(&self, price_id: &str) -> Option<&Plan> {
        self.plans
            .values()
            .find(|p| p.prices.iter().any(|pr| pr.price_id == price_id))
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> PlanCatalog {
        PlanCatalog::new(vec![
            Plan {
                id: "pro".to_string(),
                plan_type: PlanType::Subscription,
                credit: Some(PlanCredit {
                    amount: 1000,
                    expire_days: None,
                }),
                prices: vec![PlanPrice {
                    price_id: "price_pro_monthly".to_string(),
                    price_type: PriceType::Subscription,
                    interval: Some("month".to_string()),
                    amount_cents: 1900,
                    currency: "usd".to_string(),
                }],
            },
            Plan {
                id: "credits_small".to_string(),
                plan_type: PlanType::OneTime,
                credit: Some(PlanCredit {
                    amount: 500,
                    expire_days: Some(90),
                }),
                prices: vec![PlanPrice {
                    price_id: "price_credits_small".to_string(),
                    price_type: PriceType::OneTime,
                    interval: None,
                    amount_cents: 990,
                    currency: "usd".to_string(),
                }],
            },
        ])
        .unwrap()
    }

    #[test]
    fn lookup_by_id_and_price() {
        let catalog = catalog();
        assert_eq!(catalog.plan_by_id("pro").unwrap().id, "pro");
        assert_eq!(
            catalog.plan_by_price_id("price_credits_small").unwrap().id,
            "credits_small"
        );
        assert!(catalog.plan_by_id("missing").is_none());
    }

    #[test]
    fn duplicate_plan_ids_rejected() {
        let plan = Plan {
            id: "pro".to_string(),
            plan_type: PlanType::Free,
            credit: None,
            prices: vec![],
        };
        let err = PlanCatalog::new(vec![plan.clone(), plan]).unwrap_err();
        assert!(matches!(err, PlanCatalogError::DuplicatePlan(_)));
    }

    #[test]
    fn catalog_parses_from_json() {
        let json = r#"[
            {
                "id": "lifetime",
                "plan_type": "one_time",
                "credit": { "amount": 3000 },
                "prices": [
                    {
                        "price_id": "price_lifetime",
                        "price_type": "one_time",
                        "amount_cents": 19900,
                        "currency": "usd"
                    }
                ]
            }
        ]"#;
        let plans: Vec<Plan> = serde_json::from_str(json).unwrap();
        let catalog = PlanCatalog::new(plans).unwrap();
        let plan = catalog.plan_by_id("lifetime").unwrap();
        assert_eq!(plan.plan_type, PlanType::OneTime);
        // expire_days omitted means the credits never expire
        assert!(plan.credit.as_ref().unwrap().expire_days.is_none());
    }
}
