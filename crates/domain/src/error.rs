//! Domain error types.

use event_store::EventStoreError;
use thiserror::Error;

use crate::availability::CalendarError;
use crate::booking::BookingError;
use crate::catalog::CatalogError;
use crate::fee_config::FeeConfigError;
use crate::money::MoneyError;
use crate::pricing::PricingError;
use crate::stay::StayError;

/// Coarse classification used by callers to map failures onto responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input or a rule about the request itself.
    Validation,
    /// The request lost against current state or a concurrent writer.
    Conflict,
    NotFound,
    /// The actor is not allowed to perform the action.
    Forbidden,
    /// The payment provider declined or could not be reached.
    Gateway,
    /// Local state advanced but the provider call did not complete.
    Reconciliation,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Gateway => "gateway",
            ErrorKind::Reconciliation => "reconciliation",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("Booking error: {0}")]
    Booking(#[from] BookingError),

    #[error("Calendar error: {0}")]
    Calendar(#[from] CalendarError),

    #[error("Pricing error: {0}")]
    Pricing(#[from] PricingError),

    #[error("Fee configuration error: {0}")]
    FeeConfig(#[from] FeeConfigError),

    #[error("Money error: {0}")]
    Money(#[from] MoneyError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Invalid stay: {0}")]
    Stay(#[from] StayError),

    #[error("Aggregate not found: {aggregate_type} with id {aggregate_id}")]
    AggregateNotFound {
        aggregate_type: &'static str,
        aggregate_id: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    pub fn not_found(aggregate_type: &'static str, aggregate_id: impl ToString) -> Self {
        DomainError::AggregateNotFound {
            aggregate_type,
            aggregate_id: aggregate_id.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::EventStore(e) if e.is_conflict() => ErrorKind::Conflict,
            DomainError::EventStore(_) => ErrorKind::Internal,
            DomainError::Booking(e) => e.kind(),
            DomainError::Calendar(e) => e.kind(),
            DomainError::Pricing(e) => e.kind(),
            DomainError::FeeConfig(e) => e.kind(),
            DomainError::Money(_) => ErrorKind::Validation,
            DomainError::Catalog(_) => ErrorKind::Internal,
            DomainError::Stay(_) => ErrorKind::Validation,
            DomainError::AggregateNotFound { .. } => ErrorKind::NotFound,
            DomainError::Serialization(_) => ErrorKind::Internal,
        }
    }

    /// True when retrying against fresh state may succeed.
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, DomainError::EventStore(e) if e.is_conflict())
    }
}
