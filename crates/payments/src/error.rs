//! Payment subsystem errors

use saasbase_ledger::LedgerError;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    /// Signature header missing, malformed or not matching the shared
    /// secret. Surfaced as HTTP 400 so the provider's retry mechanism
    /// re-attempts delivery; never silently swallowed.
    #[error("webhook signature verification failed")]
    SignatureInvalid,

    /// The `{provider}` path segment is not a configured provider
    #[error("unsupported payment provider: {0}")]
    ProviderNotSupported(String),

    /// Caller requested an operation the adapter's capability flags do
    /// not declare (e.g. a subscription checkout against a one-time-only
    /// adapter). Rejected at the boundary before adapter dispatch.
    #[error("provider {provider} does not support {operation}")]
    OperationNotSupported {
        provider: &'static str,
        operation: &'static str,
    },

    /// Webhook body failed to parse into the provider's payload shape
    #[error("invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("plan not found: {0}")]
    PlanNotFound(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stripe api error: {0}")]
    Stripe(#[from] stripe::StripeError),

    #[error("provider api error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_rejection_names_provider_and_operation() {
        let err = PaymentError::OperationNotSupported {
            provider: "creem",
            operation: "customer portal",
        };
        assert_eq!(err.to_string(), "provider creem does not support customer portal");
    }

    #[test]
    fn ledger_errors_pass_through_transparently() {
        let err = PaymentError::from(LedgerError::InsufficientCredits {
            required: 10,
            available: 0,
        });
        assert_eq!(
            err.to_string(),
            "insufficient credits: required 10, available 0"
        );
    }
}
