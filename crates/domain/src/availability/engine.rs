use std::sync::Arc;

use chrono::NaiveDate;
use common::{AccommodationId, AggregateId};
use event_store::EventStore;

use crate::catalog::CatalogService;
use crate::command::CommandHandler;
use crate::error::DomainError;
use crate::stay::DateRange;

use super::{AccommodationCalendar, Availability, evaluate};

/// Read side of availability: calendar holds plus supplier overrides.
///
/// Queries here have no side effects. The write path (taking and releasing
/// nights) goes through the calendar aggregate, staged together with the
/// booking that causes it.
pub struct AvailabilityEngine<S: EventStore> {
    calendars: CommandHandler<S, AccommodationCalendar>,
    catalog: Arc<dyn CatalogService>,
}

impl<S: EventStore> AvailabilityEngine<S> {
    pub fn new(store: S, catalog: Arc<dyn CatalogService>) -> Self {
        Self {
            calendars: CommandHandler::new(store),
            catalog,
        }
    }

    pub fn calendars(&self) -> &CommandHandler<S, AccommodationCalendar> {
        &self.calendars
    }

    pub async fn load_calendar(
        &self,
        accommodation_id: AccommodationId,
    ) -> Result<AccommodationCalendar, DomainError> {
        self.calendars
            .load(accommodation_id.calendar_stream())
            .await
    }

    /// Full availability verdict for a range, naming what is in the way.
    #[tracing::instrument(skip(self))]
    pub async fn check(
        &self,
        accommodation_id: AccommodationId,
        range: &DateRange,
        excluding: Option<AggregateId>,
    ) -> Result<Availability, DomainError> {
        let calendar = self.load_calendar(accommodation_id).await?;
        let overrides = self.catalog.calendar_overrides(accommodation_id, range).await?;
        Ok(evaluate(&calendar, &overrides, range, excluding))
    }

    /// True when every night in `[check_in, check_out)` is free.
    pub async fn is_available(
        &self,
        accommodation_id: AccommodationId,
        check_in: NaiveDate,
        check_out: NaiveDate,
        excluding: Option<AggregateId>,
    ) -> Result<bool, DomainError> {
        let range = DateRange::new(check_in, check_out)?;
        Ok(self
            .check(accommodation_id, &range, excluding)
            .await?
            .is_available())
    }

    /// Nights within `window` that nobody holds and the supplier has not closed.
    #[tracing::instrument(skip(self))]
    pub async fn available_dates(
        &self,
        accommodation_id: AccommodationId,
        window: &DateRange,
    ) -> Result<Vec<NaiveDate>, DomainError> {
        let calendar = self.load_calendar(accommodation_id).await?;
        let overrides = self.catalog.calendar_overrides(accommodation_id, window).await?;

        Ok(window
            .each_night()
            .filter(|night| {
                let held = calendar.holds().any(|(_, range)| range.contains(*night));
                let blocked = overrides
                    .iter()
                    .any(|o| o.date == *night && !o.available);
                !held && !blocked
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Aggregate;
    use crate::catalog::{CalendarOverride, InMemoryCatalog};
    use chrono::Utc;
    use event_store::InMemoryEventStore;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 11, day).unwrap()
    }

    fn stay(from: u32, to: u32) -> DateRange {
        DateRange::new(date(from), date(to)).unwrap()
    }

    async fn hold(
        engine: &AvailabilityEngine<InMemoryEventStore>,
        accommodation_id: AccommodationId,
        booking_id: AggregateId,
        range: DateRange,
    ) {
        engine
            .calendars()
            .execute(accommodation_id.calendar_stream(), |calendar| {
                calendar.hold(accommodation_id, booking_id, range, &[], Utc::now())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn empty_calendar_is_available() {
        let engine = AvailabilityEngine::new(InMemoryEventStore::new(), Arc::new(InMemoryCatalog::new()));

        assert!(
            engine
                .is_available(AccommodationId::new(), date(1), date(5), None)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn held_nights_are_unavailable_except_to_their_booking() {
        let engine = AvailabilityEngine::new(InMemoryEventStore::new(), Arc::new(InMemoryCatalog::new()));
        let accommodation_id = AccommodationId::new();
        let booking_id = AggregateId::new();
        hold(&engine, accommodation_id, booking_id, stay(10, 13)).await;

        assert!(
            !engine
                .is_available(accommodation_id, date(12), date(15), None)
                .await
                .unwrap()
        );
        assert!(
            engine
                .is_available(accommodation_id, date(12), date(15), Some(booking_id))
                .await
                .unwrap()
        );
        assert!(
            engine
                .is_available(accommodation_id, date(13), date(15), None)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn inverted_range_is_a_validation_error() {
        let engine = AvailabilityEngine::new(InMemoryEventStore::new(), Arc::new(InMemoryCatalog::new()));

        let err = engine
            .is_available(AccommodationId::new(), date(5), date(5), None)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn available_dates_skip_holds_and_blocks() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let engine = AvailabilityEngine::new(InMemoryEventStore::new(), catalog.clone());
        let accommodation_id = AccommodationId::new();
        hold(&engine, accommodation_id, AggregateId::new(), stay(3, 5)).await;
        catalog
            .set_override(accommodation_id, CalendarOverride::blocked(date(6)))
            .await;

        let free = engine
            .available_dates(accommodation_id, &stay(1, 8))
            .await
            .unwrap();

        assert_eq!(free, vec![date(1), date(2), date(5), date(7)]);
    }

    #[tokio::test]
    async fn check_reports_the_blocking_date() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let engine = AvailabilityEngine::new(InMemoryEventStore::new(), catalog.clone());
        let accommodation_id = AccommodationId::new();
        catalog
            .set_override(accommodation_id, CalendarOverride::blocked(date(9)))
            .await;

        let verdict = engine
            .check(accommodation_id, &stay(8, 11), None)
            .await
            .unwrap();

        assert_eq!(verdict, Availability::Blocked { date: date(9) });
        let calendar = engine.load_calendar(accommodation_id).await.unwrap();
        assert!(calendar.id().is_none());
    }
}
