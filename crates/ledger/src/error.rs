//! Ledger error taxonomy
//!
//! `InsufficientCredits` is an expected, user-actionable outcome (the UI
//! prompts a purchase flow); everything else is a system fault.

use uuid::Uuid;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Caller-contract violation: consumption amount must be positive.
    /// Rejected before any I/O.
    #[error("credits must be greater than 0")]
    InvalidAmount,

    /// Not enough valid credits to cover the requested consumption
    #[error("insufficient credits: required {required}, available {available}")]
    InsufficientCredits { required: i64, available: i64 },

    /// A persisted row failed to decode into the domain model
    #[error("corrupt ledger row {id}: {reason}")]
    CorruptRow { id: Uuid, reason: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl LedgerError {
    /// True for outcomes the caller is expected to handle, as opposed to
    /// system faults worth alerting on.
    pub fn is_user_actionable(&self) -> bool {
        matches!(
            self,
            LedgerError::InvalidAmount | LedgerError::InsufficientCredits { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_credits_message_carries_amounts() {
        let err = LedgerError::InsufficientCredits {
            required: 100,
            available: 40,
        };
        assert_eq!(
            err.to_string(),
            "insufficient credits: required 100, available 40"
        );
        assert!(err.is_user_actionable());
    }

    #[test]
    fn database_errors_are_not_user_actionable() {
        let err = LedgerError::Database(sqlx::Error::PoolClosed);
        assert!(!err.is_user_actionable());
    }
}
