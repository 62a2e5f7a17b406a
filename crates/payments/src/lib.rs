//! Payment orchestration for bookings.
//!
//! [`PaymentOrchestrator`] sits between the booking lifecycle and a
//! [`PaymentGateway`]: it opens intents (split when the supplier has a payout
//! account), confirms and captures charges, sends refunds with stable
//! idempotency keys, and reconciles signed provider webhooks.

pub mod config;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod orchestrator;
pub mod signature;
pub mod stripe;
pub mod webhook;

pub use config::PaymentConfig;
pub use error::{GatewayError, PaymentError};
pub use gateway::{
    ChargeOutcome, IntentRequest, IntentStatus, PaymentGateway, PaymentIntent, RefundOutcome,
    RefundRequest, RefundStatus,
};
pub use memory::{GatewayOp, InMemoryGateway};
pub use orchestrator::{PaymentIntentHandle, PaymentOrchestrator, RefundRetryReport, WebhookEffect};
pub use signature::SignatureError;
pub use stripe::StripeGateway;
pub use webhook::WebhookEvent;
