//! Ledger domain model

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Direction of a ledger entry.
///
/// `Credit` rows hold consumable balance and are mutated down in place as
/// they are spent. `Debit` rows are audit records written after
/// consumption; their negative amount is informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Credit,
    Debit,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Credit => "credit",
            TransactionType::Debit => "debit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "credit" => Some(TransactionType::Credit),
            "debit" => Some(TransactionType::Debit),
            _ => None,
        }
    }
}

/// Source/reason classification for ledger entries.
///
/// Persisted as text; `as_str` is the canonical storage form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditsType {
    /// Credit pack purchase
    OneTimePayment,
    /// Subscription create/renewal grant
    SubscriptionPayment,
    /// Time-gated login bonus
    DailyBonus,
    /// Manual grant from the admin console
    AdminGrant,
    /// Refund adjustment
    Refund,
    /// AI usage consumption (audit debit)
    UsageDebit,
    /// Expiry write-off (audit debit)
    Expired,
}

impl CreditsType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditsType::OneTimePayment => "one_time_payment",
            CreditsType::SubscriptionPayment => "subscription_payment",
            CreditsType::DailyBonus => "daily_bonus",
            CreditsType::AdminGrant => "admin_grant",
            CreditsType::Refund => "refund",
            CreditsType::UsageDebit => "usage_debit",
            CreditsType::Expired => "expired",
        }
    }
}

impl std::fmt::Display for CreditsType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted ledger entry.
///
/// `credits_type` stays a raw string on the read path so rows written by a
/// newer deployment still decode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditTransaction {
    pub id: Uuid,
    /// Externally-referenceable id for support/audit lookups
    pub transaction_id: String,
    pub user_id: Uuid,
    /// Back-reference to the payment that produced this grant; null for
    /// admin grants, daily bonuses and debit records
    pub payment_id: Option<Uuid>,
    pub transaction_type: TransactionType,
    pub credits_type: String,
    /// Remaining balance on credit rows; negative audit amount on debits
    pub credits: i32,
    pub description: Option<String>,
    /// Null means the credits never expire
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl CreditTransaction {
    pub fn is_daily_bonus(&self) -> bool {
        self.credits_type == CreditsType::DailyBonus.as_str()
    }
}

/// Insert payload for a new ledger entry
#[derive(Debug, Clone)]
pub struct NewCreditTransaction {
    pub user_id: Uuid,
    pub payment_id: Option<Uuid>,
    pub transaction_type: TransactionType,
    pub credits_type: CreditsType,
    pub credits: i32,
    pub description: Option<String>,
    pub expires_at: Option<OffsetDateTime>,
}

/// Balance breakdown returned to dashboards
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditBalance {
    /// Sum of valid credits excluding the daily bonus
    pub user_credits: i64,
    /// Sum of valid daily-bonus credits
    pub daily_bonus_credits: i64,
    /// When the next daily bonus becomes available; null when the feature
    /// is disabled or no bonus has been granted yet
    #[serde(with = "time::serde::rfc3339::option")]
    pub next_refresh_time: Option<OffsetDateTime>,
}

impl CreditBalance {
    pub fn zero() -> Self {
        Self {
            user_credits: 0,
            daily_bonus_credits: 0,
            next_refresh_time: None,
        }
    }
}

/// One page of ledger history, newest first
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditHistoryPage {
    pub items: Vec<CreditTransaction>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
    pub has_more: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn credits_type_storage_form_round_trips_via_serde() {
        let json = serde_json::to_string(&CreditsType::SubscriptionPayment).unwrap();
        assert_eq!(json, "\"subscription_payment\"");
        let back: CreditsType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, CreditsType::SubscriptionPayment);
        assert_eq!(back.as_str(), "subscription_payment");
    }

    #[test]
    fn transaction_type_parse() {
        assert_eq!(
            TransactionType::parse("credit"),
            Some(TransactionType::Credit)
        );
        assert_eq!(TransactionType::parse("debit"), Some(TransactionType::Debit));
        assert_eq!(TransactionType::parse("other"), None);
    }

    #[test]
    fn balance_serializes_camel_case_with_rfc3339_refresh() {
        let balance = CreditBalance {
            user_credits: 500,
            daily_bonus_credits: 100,
            next_refresh_time: Some(datetime!(2025-01-02 12:00:00 UTC)),
        };
        let json = serde_json::to_value(&balance).unwrap();
        assert_eq!(json["userCredits"], 500);
        assert_eq!(json["dailyBonusCredits"], 100);
        assert_eq!(json["nextRefreshTime"], "2025-01-02T12:00:00Z");

        let zero = serde_json::to_value(CreditBalance::zero()).unwrap();
        assert!(zero["nextRefreshTime"].is_null());
    }
}
