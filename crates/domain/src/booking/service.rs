//! Booking lifecycle service.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use common::{AggregateId, UserId};
use event_store::EventStore;
use uuid::Uuid;

use crate::Clock;
use crate::aggregate::Aggregate;
use crate::availability::{AvailabilityBroadcaster, AvailabilityChange, AvailabilityEngine, ReleaseReason};
use crate::catalog::CatalogService;
use crate::command::{CommandHandler, CommandResult, commit_staged};
use crate::error::DomainError;
use crate::fee_config::{FeeConfigProvider, FeeDefaults};
use crate::money::Money;
use crate::pricing::PricingEngine;

use super::notify::dispatch;
use super::{
    Actor, Booking, BookingError, BookingEvent, BookingRequestedData, Notification, Notifier,
    ReservationRequest, SplitPayout,
};

/// Attempts at writing a calendar change before giving up on contention.
const MAX_CALENDAR_ATTEMPTS: u32 = 5;

/// Creates bookings and drives them through their lifecycle.
///
/// Every operation re-reads the booking, decides against that state and
/// appends expecting the version it read. Transitions that free nights
/// release the calendar hold in the same append.
pub struct BookingLifecycleManager<S: EventStore + Clone> {
    bookings: CommandHandler<S, Booking>,
    availability: AvailabilityEngine<S>,
    fees: FeeConfigProvider<S>,
    pricing: PricingEngine,
    catalog: Arc<dyn CatalogService>,
    notifier: Arc<dyn Notifier>,
    broadcaster: AvailabilityBroadcaster,
    payment_provider: String,
    clock: Clock,
}

impl<S: EventStore + Clone> BookingLifecycleManager<S> {
    pub fn new(store: S, catalog: Arc<dyn CatalogService>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            bookings: CommandHandler::new(store.clone()),
            availability: AvailabilityEngine::new(store.clone(), catalog.clone()),
            fees: FeeConfigProvider::new(store, FeeDefaults::default()),
            pricing: PricingEngine::default(),
            catalog,
            notifier,
            broadcaster: AvailabilityBroadcaster::default(),
            payment_provider: "STRIPE".to_string(),
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_pricing(mut self, pricing: PricingEngine) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_fee_defaults(mut self, defaults: FeeDefaults) -> Self {
        self.fees = FeeConfigProvider::new(self.bookings.store().clone(), defaults)
            .with_clock(self.clock.clone());
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.fees = FeeConfigProvider::new(self.bookings.store().clone(), self.fees.defaults().clone())
            .with_clock(clock.clone());
        self.clock = clock;
        self
    }

    pub fn with_broadcaster(mut self, broadcaster: AvailabilityBroadcaster) -> Self {
        self.broadcaster = broadcaster;
        self
    }

    pub fn with_payment_provider(mut self, provider: impl Into<String>) -> Self {
        self.payment_provider = provider.into();
        self
    }

    pub fn store(&self) -> &S {
        self.bookings.store()
    }

    pub fn availability(&self) -> &AvailabilityEngine<S> {
        &self.availability
    }

    pub fn fees(&self) -> &FeeConfigProvider<S> {
        &self.fees
    }

    pub fn pricing(&self) -> &PricingEngine {
        &self.pricing
    }

    pub fn catalog(&self) -> &Arc<dyn CatalogService> {
        &self.catalog
    }

    pub fn broadcaster(&self) -> &AvailabilityBroadcaster {
        &self.broadcaster
    }

    /// Reserves a stay.
    ///
    /// Validation and pricing happen before anything is written. The booking
    /// and the calendar hold are then appended together; if the calendar
    /// moved underneath, availability is evaluated again on fresh state.
    #[tracing::instrument(skip(self, request), fields(accommodation_id = %request.accommodation_id))]
    pub async fn create(&self, request: ReservationRequest) -> Result<Booking, DomainError> {
        let started = Instant::now();
        let now = (self.clock)();
        let range = request.validate(now.date_naive())?;
        let accommodation_id = request.accommodation_id;
        let booking_id = request.booking_id.unwrap_or_default();

        if self.bookings.load_existing(booking_id).await?.is_some() {
            return Err(BookingError::AlreadyCreated.into());
        }

        let listing = self
            .catalog
            .accommodation(accommodation_id)
            .await?
            .ok_or_else(|| DomainError::not_found("Accommodation", accommodation_id))?;
        request.validate_against(&listing, &range)?;

        let fees = self.fees.get_active().await?;
        let overrides = self.catalog.calendar_overrides(accommodation_id, &range).await?;
        let price = self
            .pricing
            .price(&listing, &range, &request.guests, &fees, &overrides)?;

        let total = price.total_price;
        let requested = BookingRequestedData {
            booking_id,
            traveler_id: request.traveler_id,
            accommodation_id,
            supplier_id: listing.supplier_id,
            range,
            guests: request.guests,
            price,
            cancellation_policy: listing.cancellation_policy,
            payment_id: Uuid::new_v4(),
            payment_method: request.payment_method,
            payment_provider: self.payment_provider.clone(),
            requested_at: now,
        };

        let mut attempt = 0;
        let result = loop {
            attempt += 1;
            let calendar = self.availability.load_calendar(accommodation_id).await?;
            let hold = match calendar.hold(accommodation_id, booking_id, range, &overrides, now) {
                Ok(events) => events,
                Err(e) => {
                    metrics::counter!("bookings_conflicts_total").increment(1);
                    tracing::info!(%booking_id, error = %e, "dates not available");
                    return Err(e.into());
                }
            };

            let booking = Booking::default();
            let events = booking.request(requested.clone())?;
            let mut booking_stage = self.bookings.stage(booking_id, booking, events)?;
            let mut calendar_stage = self.availability.calendars().stage(
                accommodation_id.calendar_stream(),
                calendar,
                hold,
            )?;

            let committed = commit_staged(
                self.store(),
                vec![booking_stage.take_append(), calendar_stage.take_append()],
            )
            .await;

            match committed {
                Ok(versions) => break booking_stage.finish(versions.first().copied().flatten()),
                Err(e) if e.is_concurrency_conflict() => {
                    if self.bookings.load_existing(booking_id).await?.is_some() {
                        return Err(BookingError::AlreadyCreated.into());
                    }
                    if attempt >= MAX_CALENDAR_ATTEMPTS {
                        metrics::counter!("bookings_conflicts_total").increment(1);
                        tracing::warn!(%booking_id, attempt, "calendar contention, giving up");
                        return Err(e);
                    }
                    tracing::debug!(%booking_id, attempt, "calendar changed, re-evaluating");
                }
                Err(e) => return Err(e),
            }
        };

        let booking = result.aggregate;
        metrics::counter!("bookings_created_total").increment(1);
        metrics::histogram!("booking_create_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        tracing::info!(%booking_id, %total, attempt, "booking requested");

        self.broadcaster.publish(AvailabilityChange {
            accommodation_id,
            booking_id,
            range,
            available: false,
        });
        dispatch(
            self.notifier.as_ref(),
            Notification::BookingRequested {
                booking_id,
                traveler_id: request.traveler_id,
                supplier_id: listing.supplier_id,
            },
        )
        .await;

        Ok(booking)
    }

    /// Supplier accepts a pending booking.
    #[tracing::instrument(skip(self))]
    pub async fn confirm(&self, booking_id: AggregateId, supplier_id: UserId) -> Result<Booking, DomainError> {
        let now = (self.clock)();
        let result = self
            .bookings
            .execute(booking_id, |booking| {
                booking.confirm(Actor::Supplier(supplier_id), now)
            })
            .await
            .map_err(missing_booking(booking_id))?;

        self.after_transition("confirm", &result).await;
        Ok(result.aggregate)
    }

    /// Supplier declines a pending booking. Anything paid is refunded in full.
    #[tracing::instrument(skip(self))]
    pub async fn reject(
        &self,
        booking_id: AggregateId,
        supplier_id: UserId,
        reason: &str,
    ) -> Result<Booking, DomainError> {
        let now = (self.clock)();
        let result = self
            .end_booking(booking_id, ReleaseReason::Rejected, |booking| {
                booking.reject(supplier_id, reason, now)
            })
            .await?;

        self.after_transition("reject", &result).await;
        Ok(result.aggregate)
    }

    /// Traveler or supplier cancels; the refund is fixed here.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(
        &self,
        booking_id: AggregateId,
        actor: Actor,
        reason: Option<String>,
    ) -> Result<Booking, DomainError> {
        let now = (self.clock)();
        let today = now.date_naive();
        let result = self
            .end_booking(booking_id, ReleaseReason::Cancelled, |booking| {
                booking.cancel(actor, reason.clone(), &self.pricing, today, now)
            })
            .await?;

        self.after_transition("cancel", &result).await;
        Ok(result.aggregate)
    }

    #[tracing::instrument(skip(self))]
    pub async fn complete(&self, booking_id: AggregateId, actor: Actor) -> Result<Booking, DomainError> {
        let now = (self.clock)();
        let result = self
            .end_booking(booking_id, ReleaseReason::Completed, |booking| {
                booking.complete(actor, now)
            })
            .await?;

        self.after_transition("complete", &result).await;
        Ok(result.aggregate)
    }

    /// Applies a transition that ends the booking, releasing its nights in
    /// the same append. Retries only when the calendar moved.
    async fn end_booking<F>(
        &self,
        booking_id: AggregateId,
        reason: ReleaseReason,
        decide: F,
    ) -> Result<CommandResult<Booking>, DomainError>
    where
        F: Fn(&Booking) -> Result<Vec<BookingEvent>, BookingError>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let booking = self
                .bookings
                .load_existing(booking_id)
                .await?
                .ok_or_else(|| DomainError::not_found("Booking", booking_id))?;
            let accommodation_id = booking
                .accommodation_id()
                .ok_or_else(|| DomainError::not_found("Booking", booking_id))?;
            let events = decide(&booking)?;

            let now = (self.clock)();
            let calendar = self.availability.load_calendar(accommodation_id).await?;
            let release = match calendar.hold_for(booking_id) {
                Some(_) => calendar.release(booking_id, reason, now)?,
                None => vec![],
            };
            let released = release.first().and_then(|_| booking.range());

            let mut booking_stage = self.bookings.stage(booking_id, booking, events)?;
            let mut calendar_stage = self.availability.calendars().stage(
                accommodation_id.calendar_stream(),
                calendar,
                release,
            )?;

            let committed = commit_staged(
                self.store(),
                vec![booking_stage.take_append(), calendar_stage.take_append()],
            )
            .await;

            match committed {
                Ok(versions) => {
                    if let Some(range) = released {
                        self.broadcaster.publish(AvailabilityChange {
                            accommodation_id,
                            booking_id,
                            range,
                            available: true,
                        });
                    }
                    return Ok(booking_stage.finish(versions.first().copied().flatten()));
                }
                Err(e) if e.is_concurrency_conflict() && attempt < MAX_CALENDAR_ATTEMPTS => {
                    tracing::debug!(%booking_id, attempt, "concurrent write, re-reading");
                }
                Err(e) => return Err(e),
            }
        }
    }

    // Queries

    #[tracing::instrument(skip(self))]
    pub async fn get_booking(&self, booking_id: AggregateId) -> Result<Option<Booking>, DomainError> {
        self.bookings.load_existing(booking_id).await
    }

    /// The booking whose payment was issued `intent_id`.
    #[tracing::instrument(skip(self))]
    pub async fn find_by_payment_intent(&self, intent_id: &str) -> Result<Option<Booking>, DomainError> {
        let envelopes = self.store().get_events_by_type("PaymentIntentCreated").await?;
        for envelope in envelopes.iter().rev() {
            if let BookingEvent::PaymentIntentCreated(data) = envelope.decode::<BookingEvent>()? {
                if data.intent_id == intent_id {
                    return self.bookings.load_existing(envelope.aggregate_id).await;
                }
            }
        }
        Ok(None)
    }

    /// Bookings with a refund recorded locally but not yet confirmed.
    #[tracing::instrument(skip(self))]
    pub async fn bookings_with_pending_refunds(&self) -> Result<Vec<Booking>, DomainError> {
        let envelopes = self.store().get_events_by_type("RefundRequested").await?;
        let ids: BTreeSet<AggregateId> = envelopes.iter().map(|e| e.aggregate_id).collect();

        let mut pending = Vec::new();
        for id in ids {
            if let Some(booking) = self.bookings.load_existing(id).await? {
                if booking.payment().is_some_and(|p| p.pending_refund().is_some()) {
                    pending.push(booking);
                }
            }
        }
        Ok(pending)
    }

    // Payment side. Driven by the payment orchestrator.

    #[tracing::instrument(skip(self, split))]
    pub async fn attach_payment_intent(
        &self,
        booking_id: AggregateId,
        intent_id: String,
        idempotency_key: String,
        split: Option<SplitPayout>,
    ) -> Result<CommandResult<Booking>, DomainError> {
        let now = (self.clock)();
        self.bookings
            .execute(booking_id, |booking| {
                booking.attach_intent(intent_id, idempotency_key, split, now)
            })
            .await
            .map_err(missing_booking(booking_id))
    }

    #[tracing::instrument(skip(self))]
    pub async fn record_payment_processing(
        &self,
        booking_id: AggregateId,
    ) -> Result<CommandResult<Booking>, DomainError> {
        let now = (self.clock)();
        self.bookings
            .execute(booking_id, |booking| booking.mark_processing(now))
            .await
            .map_err(missing_booking(booking_id))
    }

    /// Money arrived on `intent_id`; a pending booking is confirmed by it.
    #[tracing::instrument(skip(self))]
    pub async fn record_payment_succeeded(
        &self,
        booking_id: AggregateId,
        intent_id: &str,
        transaction_id: String,
        webhook_event_id: Option<String>,
    ) -> Result<CommandResult<Booking>, DomainError> {
        let now = (self.clock)();
        let result = self
            .bookings
            .execute(booking_id, |booking| {
                booking.record_payment_success(intent_id, transaction_id, webhook_event_id, now)
            })
            .await
            .map_err(missing_booking(booking_id))?;

        self.after_transition("payment_completed", &result).await;
        Ok(result)
    }

    #[tracing::instrument(skip(self))]
    pub async fn record_payment_failed(
        &self,
        booking_id: AggregateId,
        intent_id: &str,
        reason: String,
        webhook_event_id: Option<String>,
    ) -> Result<CommandResult<Booking>, DomainError> {
        let now = (self.clock)();
        let result = self
            .bookings
            .execute(booking_id, |booking| {
                booking.record_payment_failure(intent_id, reason, webhook_event_id, now)
            })
            .await
            .map_err(missing_booking(booking_id))?;

        if !result.is_noop() {
            tracing::info!(%booking_id, "payment failed");
        }
        Ok(result)
    }

    #[tracing::instrument(skip(self))]
    pub async fn request_refund(
        &self,
        booking_id: AggregateId,
        amount: Option<Money>,
        reason: &str,
    ) -> Result<CommandResult<Booking>, DomainError> {
        let now = (self.clock)();
        let result = self
            .bookings
            .execute(booking_id, |booking| booking.request_refund(amount, reason, now))
            .await
            .map_err(missing_booking(booking_id))?;

        self.after_transition("refund_requested", &result).await;
        Ok(result)
    }

    #[tracing::instrument(skip(self))]
    pub async fn record_refund_failure(
        &self,
        booking_id: AggregateId,
        error: String,
        retryable: bool,
    ) -> Result<CommandResult<Booking>, DomainError> {
        let now = (self.clock)();
        self.bookings
            .execute(booking_id, |booking| {
                booking.record_refund_failure(error, retryable, now)
            })
            .await
            .map_err(missing_booking(booking_id))
    }

    /// The gateway confirmed the pending refund.
    #[tracing::instrument(skip(self))]
    pub async fn record_refund_settled(
        &self,
        booking_id: AggregateId,
        refund_id: String,
        webhook_event_id: Option<String>,
    ) -> Result<CommandResult<Booking>, DomainError> {
        let now = (self.clock)();
        let result = self
            .bookings
            .execute(booking_id, |booking| {
                booking.settle_refund(refund_id, webhook_event_id, now)
            })
            .await
            .map_err(missing_booking(booking_id))?;

        self.after_transition("refund_settled", &result).await;
        Ok(result)
    }

    /// Applies the gateway's cumulative refunded total for the charge.
    #[tracing::instrument(skip(self))]
    pub async fn record_gateway_refund(
        &self,
        booking_id: AggregateId,
        refund_id: String,
        cumulative: Money,
        webhook_event_id: Option<String>,
    ) -> Result<CommandResult<Booking>, DomainError> {
        let now = (self.clock)();
        let result = self
            .bookings
            .execute(booking_id, |booking| {
                booking.record_gateway_refund(refund_id, cumulative, webhook_event_id, now)
            })
            .await
            .map_err(missing_booking(booking_id))?;

        self.after_transition("refund_settled", &result).await;
        Ok(result)
    }

    /// Metrics, logs and notifications for the events a command recorded.
    async fn after_transition(&self, transition: &'static str, result: &CommandResult<Booking>) {
        if result.is_noop() {
            return;
        }
        let booking = &result.aggregate;
        let Some(booking_id) = booking.id() else {
            return;
        };
        metrics::counter!("booking_transitions_total", "transition" => transition).increment(1);
        tracing::info!(%booking_id, transition, status = %booking.status(), "booking updated");

        for event in &result.events {
            if let Some(notification) = notification_for(booking, event) {
                dispatch(self.notifier.as_ref(), notification).await;
            }
            match event {
                BookingEvent::RefundRequested(data) => {
                    metrics::counter!("refunds_requested_total").increment(1);
                    tracing::info!(%booking_id, amount = %data.amount, "refund requested");
                }
                BookingEvent::RefundSettled(_) => {
                    metrics::counter!("refunds_settled_total").increment(1);
                }
                _ => {}
            }
        }
    }
}

fn notification_for(booking: &Booking, event: &BookingEvent) -> Option<Notification> {
    let booking_id = booking.id()?;
    let traveler_id = booking.traveler_id()?;
    let supplier_id = booking.supplier_id()?;

    match event {
        BookingEvent::BookingConfirmed(_) => Some(Notification::BookingConfirmed {
            booking_id,
            traveler_id,
        }),
        BookingEvent::BookingRejected(data) => Some(Notification::BookingRejected {
            booking_id,
            traveler_id,
            reason: data.reason.clone(),
        }),
        BookingEvent::BookingCancelled(data) => Some(Notification::BookingCancelled {
            booking_id,
            traveler_id,
            supplier_id,
            refund_amount: data.refund_amount,
        }),
        BookingEvent::PaymentSucceeded(_) => Some(Notification::PaymentReceived {
            booking_id,
            traveler_id,
            amount: booking.payment()?.amount(),
        }),
        BookingEvent::RefundSettled(data) => Some(Notification::PaymentRefunded {
            booking_id,
            traveler_id,
            amount: data.amount,
        }),
        _ => None,
    }
}

/// Maps "never requested" onto not-found for callers addressing by id.
fn missing_booking(booking_id: AggregateId) -> impl Fn(DomainError) -> DomainError {
    move |e| match e {
        DomainError::Booking(BookingError::NotCreated) => DomainError::not_found("Booking", booking_id),
        other => other,
    }
}
