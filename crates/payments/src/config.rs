//! Payment configuration loaded from environment variables.

use std::time::Duration;

use crate::stripe::DEFAULT_API_BASE;

/// Reads:
/// - `PAYMENT_PROVIDER`: name recorded on new payments (default `"STRIPE"`)
/// - `PAYMENT_WEBHOOK_SECRET`: shared secret for webhook signatures
/// - `PAYMENT_WEBHOOK_TOLERANCE_SECS`: allowed clock skew (default `300`)
/// - `STRIPE_SECRET_KEY`: enables the Stripe adapter when set
/// - `STRIPE_API_BASE`: Stripe host (default `https://api.stripe.com`)
#[derive(Debug, Clone)]
pub struct PaymentConfig {
    pub provider: String,
    pub webhook_secret: String,
    pub webhook_tolerance: Duration,
    pub stripe_secret_key: Option<String>,
    pub stripe_api_base: String,
}

impl PaymentConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            provider: std::env::var("PAYMENT_PROVIDER").unwrap_or(defaults.provider),
            webhook_secret: std::env::var("PAYMENT_WEBHOOK_SECRET")
                .unwrap_or(defaults.webhook_secret),
            webhook_tolerance: std::env::var("PAYMENT_WEBHOOK_TOLERANCE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.webhook_tolerance),
            stripe_secret_key: std::env::var("STRIPE_SECRET_KEY")
                .ok()
                .filter(|key| !key.is_empty()),
            stripe_api_base: std::env::var("STRIPE_API_BASE").unwrap_or(defaults.stripe_api_base),
        }
    }

    pub fn with_webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.webhook_secret = secret.into();
        self
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            provider: "STRIPE".to_string(),
            webhook_secret: String::new(),
            webhook_tolerance: Duration::from_secs(300),
            stripe_secret_key: None,
            stripe_api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = PaymentConfig::default();
        assert_eq!(config.provider, "STRIPE");
        assert_eq!(config.webhook_tolerance, Duration::from_secs(300));
        assert!(config.stripe_secret_key.is_none());
        assert_eq!(config.stripe_api_base, "https://api.stripe.com");
    }

    #[test]
    fn secret_builder() {
        let config = PaymentConfig::default().with_webhook_secret("whsec_1");
        assert_eq!(config.webhook_secret, "whsec_1");
    }
}
