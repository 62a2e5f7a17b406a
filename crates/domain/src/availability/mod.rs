//! Per-accommodation availability.
//!
//! Each accommodation has a calendar stream recording which bookings hold
//! which nights. Booking creation writes its hold on that stream in the same
//! transaction as the booking itself, so the calendar version serializes
//! competing reservations for one accommodation.

mod broadcast;
mod calendar;
mod engine;

pub use broadcast::{AvailabilityBroadcaster, AvailabilityChange};
pub use calendar::{
    AccommodationCalendar, Availability, CalendarEvent, NightsHeldData, NightsReleasedData,
    ReleaseReason, evaluate,
};
pub use engine::AvailabilityEngine;

use chrono::NaiveDate;
use common::AggregateId;
use thiserror::Error;

use crate::error::ErrorKind;
use crate::stay::DateRange;

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("Dates {range} overlap booking {booking_id}")]
    Overlap {
        booking_id: AggregateId,
        range: DateRange,
    },

    #[error("Date {date} is blocked by the supplier")]
    DateBlocked { date: NaiveDate },

    #[error("Booking {booking_id} already holds nights on this calendar")]
    AlreadyHeld { booking_id: AggregateId },

    #[error("Booking {booking_id} holds no nights on this calendar")]
    NotHeld { booking_id: AggregateId },
}

impl CalendarError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CalendarError::Overlap { .. }
            | CalendarError::DateBlocked { .. }
            | CalendarError::AlreadyHeld { .. } => ErrorKind::Conflict,
            CalendarError::NotHeld { .. } => ErrorKind::Internal,
        }
    }
}
