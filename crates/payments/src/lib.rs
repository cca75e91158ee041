#![allow(clippy::result_large_err)] // PaymentError carries provider error payloads
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! SaaSBase Payments
//!
//! Provider adapters, normalized payment/subscription records and the
//! webhook reconciliation pipeline.
//!
//! Each provider adapter verifies its own webhook signatures and
//! translates the provider's native event taxonomy into one normalized
//! [`WebhookEvent`] shape. The reconciliation pipeline consumes those
//! events and applies idempotent upserts plus credit grants inside one
//! database transaction per event. At-least-once delivery is assumed
//! throughout: every state-changing branch first checks for an existing
//! row keyed by the provider's external id.

pub mod creem;
pub mod error;
pub mod event;
pub mod provider;
pub mod reconcile;
pub mod store;
pub mod stripe_provider;

pub use creem::{CreemConfig, CreemProvider};
pub use error::{PaymentError, PaymentResult};
pub use event::{
    CheckoutParams, CheckoutSession, PaymentCycle, PaymentInfo, ProviderCapabilities, ProviderKey,
    SubscriptionInfo, WebhookEvent, WebhookEventKind,
};
pub use provider::{ProviderAdapter, ProviderRegistry};
pub use reconcile::WebhookProcessor;
pub use store::{
    NewPayment, NewSubscription, PaymentRecord, PaymentStore, PaymentType, SubscriptionRecord,
    SubscriptionStore,
};
pub use stripe_provider::{StripeConfig, StripeProvider};
