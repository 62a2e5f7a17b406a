use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use common::{AccommodationId, AggregateId};
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::{Aggregate, DomainEvent};
use crate::catalog::CalendarOverride;
use crate::stay::DateRange;

use super::CalendarError;

/// Result of checking a date range against a calendar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Available,
    /// Another booking holds at least one of the nights.
    Conflict {
        booking_id: AggregateId,
        range: DateRange,
    },
    /// The supplier closed one of the nights.
    Blocked { date: NaiveDate },
}

impl Availability {
    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available)
    }
}

/// Checks `range` against current holds and supplier overrides.
///
/// Holds use half-open overlap, so back-to-back stays are allowed. The hold
/// of `excluding`, if any, is ignored.
pub fn evaluate(
    calendar: &AccommodationCalendar,
    overrides: &[CalendarOverride],
    range: &DateRange,
    excluding: Option<AggregateId>,
) -> Availability {
    let conflict = calendar
        .holds
        .iter()
        .filter(|(booking_id, _)| Some(**booking_id) != excluding)
        .filter(|(_, held)| held.overlaps(range))
        .min_by_key(|(_, held)| held.check_in());
    if let Some((booking_id, held)) = conflict {
        return Availability::Conflict {
            booking_id: *booking_id,
            range: *held,
        };
    }

    let blocked = overrides
        .iter()
        .filter(|o| !o.available && range.contains(o.date))
        .map(|o| o.date)
        .min();
    if let Some(date) = blocked {
        return Availability::Blocked { date };
    }

    Availability::Available
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleaseReason {
    Cancelled,
    Rejected,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CalendarEvent {
    /// A booking took the nights of its stay.
    NightsHeld(NightsHeldData),

    /// A booking gave its nights back.
    NightsReleased(NightsReleasedData),
}

impl DomainEvent for CalendarEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CalendarEvent::NightsHeld(_) => "NightsHeld",
            CalendarEvent::NightsReleased(_) => "NightsReleased",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NightsHeldData {
    pub accommodation_id: AccommodationId,
    pub booking_id: AggregateId,
    pub range: DateRange,
    pub held_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NightsReleasedData {
    pub booking_id: AggregateId,
    pub range: DateRange,
    pub reason: ReleaseReason,
    pub released_at: DateTime<Utc>,
}

/// Nights currently held on one accommodation, keyed by booking.
#[derive(Debug, Default, Clone)]
pub struct AccommodationCalendar {
    id: Option<AggregateId>,
    accommodation_id: Option<AccommodationId>,
    holds: BTreeMap<AggregateId, DateRange>,
    version: Version,
}

impl Aggregate for AccommodationCalendar {
    type Event = CalendarEvent;
    type Error = CalendarError;

    fn aggregate_type() -> &'static str {
        "AccommodationCalendar"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            CalendarEvent::NightsHeld(data) => {
                self.id = Some(data.accommodation_id.calendar_stream());
                self.accommodation_id = Some(data.accommodation_id);
                self.holds.insert(data.booking_id, data.range);
            }
            CalendarEvent::NightsReleased(data) => {
                self.holds.remove(&data.booking_id);
            }
        }
    }
}

impl AccommodationCalendar {
    pub fn accommodation_id(&self) -> Option<AccommodationId> {
        self.accommodation_id
    }

    pub fn hold_for(&self, booking_id: AggregateId) -> Option<&DateRange> {
        self.holds.get(&booking_id)
    }

    pub fn holds(&self) -> impl Iterator<Item = (&AggregateId, &DateRange)> {
        self.holds.iter()
    }

    pub fn hold_count(&self) -> usize {
        self.holds.len()
    }

    // Commands

    /// Takes the nights of `range` for a booking.
    pub fn hold(
        &self,
        accommodation_id: AccommodationId,
        booking_id: AggregateId,
        range: DateRange,
        overrides: &[CalendarOverride],
        now: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>, CalendarError> {
        if self.holds.contains_key(&booking_id) {
            return Err(CalendarError::AlreadyHeld { booking_id });
        }

        match evaluate(self, overrides, &range, None) {
            Availability::Available => {}
            Availability::Conflict { booking_id, range } => {
                return Err(CalendarError::Overlap { booking_id, range });
            }
            Availability::Blocked { date } => {
                return Err(CalendarError::DateBlocked { date });
            }
        }

        Ok(vec![CalendarEvent::NightsHeld(NightsHeldData {
            accommodation_id,
            booking_id,
            range,
            held_at: now,
        })])
    }

    /// Gives back the nights held by a booking.
    pub fn release(
        &self,
        booking_id: AggregateId,
        reason: ReleaseReason,
        now: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>, CalendarError> {
        let range = self
            .holds
            .get(&booking_id)
            .copied()
            .ok_or(CalendarError::NotHeld { booking_id })?;

        Ok(vec![CalendarEvent::NightsReleased(NightsReleasedData {
            booking_id,
            range,
            reason,
            released_at: now,
        })])
    }
}
