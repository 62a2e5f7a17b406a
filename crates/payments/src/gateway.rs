//! Payment provider seam.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::{Money, PaymentMethod, SplitPayout};
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, PaymentError};
use crate::signature;
use crate::webhook::WebhookEvent;

#[derive(Debug, Clone, PartialEq)]
pub struct IntentRequest {
    pub booking_id: AggregateId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub description: String,
    pub idempotency_key: String,
    pub split: Option<SplitPayout>,
}

/// Provider-side lifecycle of a payment intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Succeeded,
    Canceled,
    Unknown(String),
}

impl IntentStatus {
    pub fn from_provider(status: &str) -> Self {
        match status {
            "requires_payment_method" => IntentStatus::RequiresPaymentMethod,
            "requires_confirmation" => IntentStatus::RequiresConfirmation,
            "requires_action" => IntentStatus::RequiresAction,
            "processing" => IntentStatus::Processing,
            "requires_capture" => IntentStatus::RequiresCapture,
            "succeeded" => IntentStatus::Succeeded,
            "canceled" => IntentStatus::Canceled,
            other => IntentStatus::Unknown(other.to_string()),
        }
    }

    /// Accepted by the provider; funds will follow.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, IntentStatus::Processing | IntentStatus::RequiresCapture)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentIntent {
    pub id: String,
    /// Handed to the client to complete payment; absent on some providers.
    pub client_secret: Option<String>,
    pub status: IntentStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChargeOutcome {
    pub status: IntentStatus,
    pub transaction_id: Option<String>,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefundRequest {
    pub intent_id: String,
    pub amount: Money,
    pub reason: String,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundStatus {
    Succeeded,
    /// Accepted; the outcome arrives by webhook.
    Pending,
    Failed,
}

impl RefundStatus {
    pub fn from_provider(status: &str) -> Self {
        match status {
            "succeeded" => RefundStatus::Succeeded,
            "failed" | "canceled" => RefundStatus::Failed,
            _ => RefundStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefundOutcome {
    pub refund_id: String,
    pub amount: Money,
    pub status: RefundStatus,
}

/// Operations the orchestrator needs from a payment provider.
///
/// Every mutating call carries an idempotency key, so retrying after a
/// timeout never charges or refunds twice.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Name recorded on payments, e.g. `STRIPE`.
    fn provider(&self) -> &'static str;

    async fn create_payment_intent(
        &self,
        request: IntentRequest,
    ) -> Result<PaymentIntent, GatewayError>;

    async fn confirm(
        &self,
        intent_id: &str,
        method_token: &str,
    ) -> Result<ChargeOutcome, GatewayError>;

    async fn capture(&self, intent_id: &str) -> Result<ChargeOutcome, GatewayError>;

    async fn refund(&self, request: RefundRequest) -> Result<RefundOutcome, GatewayError>;

    async fn payment_status(&self, intent_id: &str) -> Result<IntentStatus, GatewayError>;

    fn verify_webhook_signature(
        &self,
        payload: &[u8],
        header: &str,
        secret: &str,
        tolerance: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), PaymentError> {
        signature::verify(payload, header, secret, tolerance, now)?;
        Ok(())
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> Result<WebhookEvent, PaymentError> {
        WebhookEvent::parse(payload)
    }
}
