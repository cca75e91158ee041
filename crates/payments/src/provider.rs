//! Provider adapter dispatch
//!
//! Adapters are a closed set, so dispatch is a plain enum rather than a
//! trait object. Capability checks happen here, at the boundary, before
//! any provider API call.

use std::collections::HashMap;
use std::sync::Arc;

use crate::creem::CreemProvider;
use crate::error::{PaymentError, PaymentResult};
use crate::event::{
    CheckoutParams, CheckoutSession, ProviderCapabilities, ProviderKey, WebhookEvent,
};
use crate::stripe_provider::StripeProvider;

#[derive(Debug)]
pub enum ProviderAdapter {
    Stripe(StripeProvider),
    Creem(CreemProvider),
}

impl ProviderAdapter {
    pub fn key(&self) -> ProviderKey {
        match self {
            ProviderAdapter::Stripe(_) => ProviderKey::Stripe,
            ProviderAdapter::Creem(_) => ProviderKey::Creem,
        }
    }

    pub fn capabilities(&self) -> ProviderCapabilities {
        match self {
            ProviderAdapter::Stripe(p) => p.capabilities(),
            ProviderAdapter::Creem(p) => p.capabilities(),
        }
    }

    pub async fn create_checkout(&self, params: &CheckoutParams) -> PaymentResult<CheckoutSession> {
        let caps = self.capabilities();
        if params.subscription && !caps.subscription {
            return Err(self.unsupported("subscription checkout"));
        }
        if !params.subscription && !caps.one_time {
            return Err(self.unsupported("one-time checkout"));
        }
        match self {
            ProviderAdapter::Stripe(p) => p.create_checkout(params).await,
            ProviderAdapter::Creem(p) => p.create_checkout(params).await,
        }
    }

    /// Verify the delivery's signature and normalize its payload
    pub fn handle_webhook(&self, payload: &str, signature: &str) -> PaymentResult<WebhookEvent> {
        match self {
            ProviderAdapter::Stripe(p) => p.handle_webhook(payload, signature),
            ProviderAdapter::Creem(p) => p.handle_webhook(payload, signature),
        }
    }

    pub async fn cancel_subscription(&self, provider_subscription_id: &str) -> PaymentResult<()> {
        if !self.capabilities().subscription {
            return Err(self.unsupported("subscription cancellation"));
        }
        match self {
            ProviderAdapter::Stripe(p) => p.cancel_subscription(provider_subscription_id).await,
            ProviderAdapter::Creem(p) => p.cancel_subscription(provider_subscription_id).await,
        }
    }

    /// Swap an active subscription onto a different price (plan change)
    pub async fn update_subscription(
        &self,
        provider_subscription_id: &str,
        new_price_id: &str,
    ) -> PaymentResult<()> {
        if !self.capabilities().subscription {
            return Err(self.unsupported("subscription update"));
        }
        match self {
            ProviderAdapter::Stripe(p) => {
                p.update_subscription(provider_subscription_id, new_price_id)
                    .await
            }
            ProviderAdapter::Creem(p) => {
                p.update_subscription(provider_subscription_id, new_price_id)
                    .await
            }
        }
    }

    pub async fn customer_portal_url(
        &self,
        provider_customer_id: &str,
        return_url: &str,
    ) -> PaymentResult<String> {
        if !self.capabilities().customer_portal {
            return Err(self.unsupported("customer portal"));
        }
        match self {
            ProviderAdapter::Stripe(p) => {
                p.customer_portal_url(provider_customer_id, return_url).await
            }
            ProviderAdapter::Creem(p) => p.customer_portal_url(provider_customer_id).await,
        }
    }

    fn unsupported(&self, operation: &'static str) -> PaymentError {
        PaymentError::OperationNotSupported {
            provider: self.key().as_str(),
            operation,
        }
    }
}

/// The configured adapters, keyed for webhook-path dispatch. Providers
/// without configuration are simply absent; their webhook path returns
/// `ProviderNotSupported`.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<ProviderKey, Arc<ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, adapter: ProviderAdapter) -> Self {
        self.adapters.insert(adapter.key(), Arc::new(adapter));
        self
    }

    pub fn get(&self, key: ProviderKey) -> PaymentResult<Arc<ProviderAdapter>> {
        self.adapters
            .get(&key)
            .cloned()
            .ok_or_else(|| PaymentError::ProviderNotSupported(key.as_str().to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::creem::CreemConfig;

    fn registry_with_creem() -> ProviderRegistry {
        ProviderRegistry::new().register(ProviderAdapter::Creem(CreemProvider::new(
            CreemConfig::new("key".to_string(), "secret".to_string()),
        )))
    }

    #[test]
    fn unregistered_provider_is_rejected() {
        let registry = registry_with_creem();
        assert!(registry.get(ProviderKey::Creem).is_ok());
        let err = registry.get(ProviderKey::Stripe).unwrap_err();
        assert!(matches!(err, PaymentError::ProviderNotSupported(p) if p == "stripe"));
    }

    #[test]
    fn empty_registry_reports_empty() {
        assert!(ProviderRegistry::new().is_empty());
        assert!(!registry_with_creem().is_empty());
    }

    #[tokio::test]
    async fn update_subscription_dispatches_to_the_provider() {
        // Unreachable API host: passing the capability gate and reaching
        // the provider call surfaces as a transport error, not
        // OperationNotSupported
        let mut config = CreemConfig::new("key".to_string(), "secret".to_string());
        config.api_base = "http://127.0.0.1:1".to_string();
        let adapter = ProviderAdapter::Creem(CreemProvider::new(config));

        let err = adapter
            .update_subscription("sub_1", "prod_pro")
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Http(_)));
    }
}
