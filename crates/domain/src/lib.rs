//! Domain layer of the reservation core.
//!
//! - [`fee_config`]: the platform's active fee configuration
//! - [`availability`]: per-accommodation calendars of held nights
//! - [`pricing`]: price breakdowns and cancellation refunds
//! - [`booking`]: the booking aggregate, its payment, and the lifecycle service
//!
//! Everything is event sourced through [`command::CommandHandler`].

pub mod aggregate;
pub mod availability;
pub mod booking;
pub mod catalog;
pub mod command;
pub mod error;
pub mod fee_config;
pub mod money;
pub mod pricing;
pub mod stay;

use std::sync::Arc;

use chrono::{DateTime, Utc};

pub use aggregate::{Aggregate, DomainEvent};
pub use availability::{AvailabilityBroadcaster, AvailabilityChange, AvailabilityEngine};
pub use booking::{
    Actor, Booking, BookingError, BookingEvent, BookingLifecycleManager, BookingStatus,
    Notification, Notifier, Payment, PaymentMethod, PaymentStatus, ReservationRequest,
    SplitPayout,
};
pub use catalog::{AccommodationSnapshot, CalendarOverride, CatalogService, InMemoryCatalog};
pub use command::{CommandHandler, CommandResult};
pub use error::{DomainError, ErrorKind};
pub use fee_config::{FeeConfig, FeeConfigChanges, FeeConfigProvider, FeeDefaults};
pub use money::{Currency, Money, MoneyError};
pub use pricing::{CancellationPolicyTier, PriceBreakdown, PricingEngine};
pub use stay::{DateRange, GuestCount, StayError};

/// Source of the current time. Swapped for a fixed clock in tests.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;
