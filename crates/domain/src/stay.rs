//! Value objects describing a requested stay: dates and guests.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest stay accepted from anyone, whatever the listing allows.
pub const MAX_NIGHTS: u32 = 365;
pub const MAX_GUESTS: u32 = 50;
pub const MAX_CHILDREN: u32 = 20;
pub const MAX_INFANTS: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StayError {
    #[error("Check-out {check_out} must be after check-in {check_in}")]
    InvalidDateRange {
        check_in: NaiveDate,
        check_out: NaiveDate,
    },

    #[error("Check-in date {check_in} cannot be in the past")]
    CheckInInPast { check_in: NaiveDate },

    #[error("Maximum stay duration is {max} nights, {nights} requested")]
    TooManyNights { nights: u32, max: u32 },

    #[error("At least one adult is required")]
    NoAdults,

    #[error("Maximum {max} {band} allowed, {requested} requested")]
    TooManyGuests {
        band: &'static str,
        requested: u32,
        max: u32,
    },

    #[error("Guest breakdown adds up to {actual}, but {declared} guests were declared")]
    GuestCountMismatch { declared: u32, actual: u32 },
}

/// A half-open range of nights: `[check_in, check_out)`.
///
/// The check-out day itself is not occupied, so a stay ending on a given day
/// never conflicts with one starting on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    check_in: NaiveDate,
    check_out: NaiveDate,
}

impl DateRange {
    pub fn new(check_in: NaiveDate, check_out: NaiveDate) -> Result<Self, StayError> {
        if check_out <= check_in {
            return Err(StayError::InvalidDateRange {
                check_in,
                check_out,
            });
        }
        Ok(Self {
            check_in,
            check_out,
        })
    }

    pub fn check_in(&self) -> NaiveDate {
        self.check_in
    }

    pub fn check_out(&self) -> NaiveDate {
        self.check_out
    }

    pub fn nights(&self) -> u32 {
        u32::try_from((self.check_out - self.check_in).num_days()).unwrap_or(0)
    }

    /// True when both ranges share at least one night.
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.check_in < other.check_out && self.check_out > other.check_in
    }

    /// True when `date` is one of the occupied nights.
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.check_in <= date && date < self.check_out
    }

    /// Each occupied night, in order.
    pub fn each_night(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        (0..u64::from(self.nights())).filter_map(|offset| self.check_in.checked_add_days(Days::new(offset)))
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.check_in, self.check_out)
    }
}

/// Guests on a booking, broken down by age band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GuestCount {
    pub adults: u32,
    pub children: u32,
    pub infants: u32,
}

impl GuestCount {
    pub fn new(adults: u32, children: u32, infants: u32) -> Self {
        Self {
            adults,
            children,
            infants,
        }
    }

    pub fn adults(adults: u32) -> Self {
        Self::new(adults, 0, 0)
    }

    /// Head count. Saturates; [`GuestCount::validate`] bounds every band.
    pub fn total(&self) -> u32 {
        self.adults
            .saturating_add(self.children)
            .saturating_add(self.infants)
    }

    /// Checks the breakdown against the absolute limits and the declared
    /// head count.
    pub fn validate(&self, declared_total: u32) -> Result<(), StayError> {
        if self.adults == 0 {
            return Err(StayError::NoAdults);
        }
        for (band, requested, max) in [
            ("adults", self.adults, MAX_GUESTS),
            ("children", self.children, MAX_CHILDREN),
            ("infants", self.infants, MAX_INFANTS),
            ("guests", self.total(), MAX_GUESTS),
        ] {
            if requested > max {
                return Err(StayError::TooManyGuests {
                    band,
                    requested,
                    max,
                });
            }
        }
        if self.total() != declared_total {
            return Err(StayError::GuestCountMismatch {
                declared: declared_total,
                actual: self.total(),
            });
        }
        Ok(())
    }
}
