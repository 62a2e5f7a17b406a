//! Inputs to the booking lifecycle.

use chrono::NaiveDate;
use common::{AccommodationId, AggregateId, UserId};
use serde::{Deserialize, Serialize};

use crate::catalog::AccommodationSnapshot;
use crate::error::DomainError;
use crate::stay::{DateRange, GuestCount, MAX_NIGHTS, StayError};

use super::{BookingError, PaymentMethod};

/// A traveler's request to reserve a stay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationRequest {
    /// Chosen by the caller for idempotent retries; generated when absent.
    pub booking_id: Option<AggregateId>,
    pub traveler_id: UserId,
    pub accommodation_id: AccommodationId,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub guests: GuestCount,
    /// Head count as declared by the traveler; must match `guests`.
    pub total_guests: u32,
    pub payment_method: PaymentMethod,
}

impl ReservationRequest {
    pub fn new(
        traveler_id: UserId,
        accommodation_id: AccommodationId,
        check_in: NaiveDate,
        check_out: NaiveDate,
        guests: GuestCount,
    ) -> Self {
        Self {
            booking_id: None,
            traveler_id,
            accommodation_id,
            check_in,
            check_out,
            guests,
            total_guests: guests.total(),
            payment_method: PaymentMethod::Card,
        }
    }

    pub fn with_booking_id(mut self, booking_id: AggregateId) -> Self {
        self.booking_id = Some(booking_id);
        self
    }

    pub fn with_payment_method(mut self, method: PaymentMethod) -> Self {
        self.payment_method = method;
        self
    }

    pub fn with_declared_total(mut self, total_guests: u32) -> Self {
        self.total_guests = total_guests;
        self
    }

    /// Checks everything that does not need the listing. Check-in may be
    /// `today` but not earlier.
    pub fn validate(&self, today: NaiveDate) -> Result<DateRange, DomainError> {
        if self.check_in < today {
            return Err(StayError::CheckInInPast {
                check_in: self.check_in,
            }
            .into());
        }
        let range = DateRange::new(self.check_in, self.check_out)?;
        let nights = range.nights();
        if nights > MAX_NIGHTS {
            return Err(StayError::TooManyNights {
                nights,
                max: MAX_NIGHTS,
            }
            .into());
        }
        self.guests.validate(self.total_guests)?;
        Ok(range)
    }

    /// Checks the request against the listing's rules.
    pub fn validate_against(
        &self,
        listing: &AccommodationSnapshot,
        range: &DateRange,
    ) -> Result<(), BookingError> {
        if !listing.approved {
            return Err(BookingError::AccommodationNotBookable);
        }
        if self.guests.total() > listing.max_guests {
            return Err(BookingError::TooManyGuests {
                requested: self.guests.total(),
                max: listing.max_guests,
            });
        }
        let nights = range.nights();
        if nights < listing.min_nights {
            return Err(BookingError::StayTooShort {
                nights,
                min: listing.min_nights,
            });
        }
        if let Some(max) = listing.max_nights {
            if nights > max {
                return Err(BookingError::StayTooLong { nights, max });
            }
        }
        Ok(())
    }
}
