//! Payment error types.

use common::AggregateId;
use domain::{DomainError, ErrorKind};
use thiserror::Error;

use crate::signature::SignatureError;

/// Failure reported by, or on the way to, the payment provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Timeouts, rate limits, provider outages. The same request, under the
    /// same idempotency key, may be sent again.
    #[error("{code}: {message}")]
    Retryable { code: String, message: String },

    /// Declines and invalid requests. Needs different input.
    #[error("{code}: {message}")]
    Terminal { code: String, message: String },

    #[error("Unexpected provider response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    pub fn retryable(code: impl Into<String>, message: impl Into<String>) -> Self {
        GatewayError::Retryable {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn terminal(code: impl Into<String>, message: impl Into<String>) -> Self {
        GatewayError::Terminal {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Retryable { .. })
    }

    /// The provider's own wording of the failure.
    pub fn provider_message(&self) -> &str {
        match self {
            GatewayError::Retryable { message, .. } | GatewayError::Terminal { message, .. } => {
                message
            }
            GatewayError::InvalidResponse(message) => message,
        }
    }
}

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("Payment gateway error (ref {reference}): {source}")]
    Gateway {
        #[source]
        source: GatewayError,
        /// Support reference; also logged next to the provider's reason.
        reference: String,
    },

    #[error("Refund for booking {booking_id} needs reconciliation: {reason}")]
    Reconciliation {
        booking_id: AggregateId,
        reason: String,
    },

    #[error("Webhook rejected: {0}")]
    InvalidSignature(#[from] SignatureError),

    #[error("Malformed webhook payload: {0}")]
    MalformedWebhook(String),

    #[error("No booking holds payment intent {0}")]
    IntentNotFound(String),
}

impl PaymentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PaymentError::Domain(e) => e.kind(),
            PaymentError::Gateway { .. } => ErrorKind::Gateway,
            PaymentError::Reconciliation { .. } => ErrorKind::Reconciliation,
            PaymentError::InvalidSignature(_) | PaymentError::MalformedWebhook(_) => {
                ErrorKind::Validation
            }
            PaymentError::IntentNotFound(_) => ErrorKind::NotFound,
        }
    }

    /// Text safe to show the traveler or supplier.
    ///
    /// Gateway failures are not paraphrased to users; they get a generic
    /// line and the reference support can look up.
    pub fn user_message(&self) -> String {
        match self {
            PaymentError::Gateway { reference, .. } => {
                format!("Payment could not be completed. Reference: {reference}")
            }
            PaymentError::Reconciliation { booking_id, .. } => {
                format!("Your refund is being processed. Reference: {booking_id}")
            }
            other => other.to_string(),
        }
    }

    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, PaymentError::Domain(e) if e.is_concurrency_conflict())
    }
}
