//! Stay pricing and cancellation refunds.

mod breakdown;
mod engine;
mod refund;

pub use breakdown::PriceBreakdown;
pub use engine::PricingEngine;
pub use refund::{CancellationPolicyTier, RefundPolicyTable, RefundRule};

use rust_decimal::Decimal;
use thiserror::Error;

use crate::error::ErrorKind;
use crate::money::MoneyError;

#[derive(Debug, Error)]
pub enum PricingError {
    #[error("A stay must cover at least one night")]
    NoNights,

    #[error("A stay must have at least one guest")]
    NoGuests,

    #[error(transparent)]
    Money(#[from] MoneyError),

    #[error("Refund percentage {percentage} for {tier} is outside 0..=100")]
    InvalidRefundRule {
        tier: CancellationPolicyTier,
        percentage: Decimal,
    },
}

impl PricingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PricingError::NoNights | PricingError::NoGuests => ErrorKind::Validation,
            PricingError::Money(_) => ErrorKind::Internal,
            PricingError::InvalidRefundRule { .. } => ErrorKind::Validation,
        }
    }
}
