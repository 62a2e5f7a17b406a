//! Booking aggregate and lifecycle.
//!
//! A booking and its payment form one aggregate: they are created in the
//! same event, read together and transitioned on the same stream.

mod aggregate;
mod commands;
mod events;
mod notify;
mod payment;
mod service;
mod state;

pub use aggregate::{Booking, Cancellation};
pub use commands::ReservationRequest;
pub use events::*;
pub use notify::{InMemoryNotifier, LogNotifier, Notification, NotifyError, Notifier};
pub use payment::{Payment, PaymentMethod, PaymentStatus, PendingRefund, QueuedRefund, SplitPayout};
pub use service::BookingLifecycleManager;
pub use state::BookingStatus;

use common::UserId;
use thiserror::Error;

use crate::error::ErrorKind;
use crate::money::{Money, MoneyError};

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("Booking already exists")]
    AlreadyCreated,

    #[error("Booking has not been requested")]
    NotCreated,

    #[error("Cannot {action} a booking in {status} status")]
    InvalidTransition {
        status: BookingStatus,
        action: &'static str,
    },

    #[error("{actor} may not {action} this booking")]
    NotPermitted { actor: String, action: &'static str },

    #[error("A reason is required to {action} a booking")]
    ReasonRequired { action: &'static str },

    #[error("Accommodation is not open for reservations")]
    AccommodationNotBookable,

    #[error("{requested} guests exceed the maximum of {max}")]
    TooManyGuests { requested: u32, max: u32 },

    #[error("Stay of {nights} nights is shorter than the minimum of {min}")]
    StayTooShort { nights: u32, min: u32 },

    #[error("Stay of {nights} nights is longer than the maximum of {max}")]
    StayTooLong { nights: u32, max: u32 },

    #[error("Cannot {action} a payment in {status} status")]
    PaymentState {
        status: PaymentStatus,
        action: &'static str,
    },

    #[error("A refund is already in flight")]
    RefundInFlight,

    #[error("Nothing left to refund")]
    NothingToRefund,

    #[error("Refund amount {amount} is not valid")]
    InvalidRefundAmount { amount: Money },

    #[error(transparent)]
    Money(#[from] MoneyError),
}

impl BookingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BookingError::AlreadyCreated => ErrorKind::Conflict,
            BookingError::NotCreated => ErrorKind::NotFound,
            BookingError::InvalidTransition { .. } => ErrorKind::Conflict,
            BookingError::NotPermitted { .. } => ErrorKind::Forbidden,
            BookingError::ReasonRequired { .. } => ErrorKind::Validation,
            BookingError::AccommodationNotBookable => ErrorKind::Validation,
            BookingError::TooManyGuests { .. } => ErrorKind::Validation,
            BookingError::StayTooShort { .. } => ErrorKind::Validation,
            BookingError::StayTooLong { .. } => ErrorKind::Validation,
            BookingError::PaymentState { .. } => ErrorKind::Conflict,
            BookingError::RefundInFlight => ErrorKind::Conflict,
            BookingError::NothingToRefund => ErrorKind::Conflict,
            BookingError::InvalidRefundAmount { .. } => ErrorKind::Validation,
            BookingError::Money(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn not_permitted(actor: &Actor, action: &'static str) -> Self {
        BookingError::NotPermitted {
            actor: actor.to_string(),
            action,
        }
    }
}

/// Who is asking for a transition. The caller has already authenticated
/// the user; the booking only checks that the id matches its own parties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "role", content = "user_id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Actor {
    Traveler(UserId),
    Supplier(UserId),
    /// Transitions driven by payment events or scheduled jobs.
    System,
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Actor::Traveler(id) => write!(f, "traveler {id}"),
            Actor::Supplier(id) => write!(f, "supplier {id}"),
            Actor::System => f.write_str("system"),
        }
    }
}
