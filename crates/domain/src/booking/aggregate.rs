//! Booking aggregate implementation.

use chrono::{DateTime, NaiveDate, Utc};
use common::{AccommodationId, AggregateId, UserId};
use event_store::Version;

use crate::aggregate::Aggregate;
use crate::money::Money;
use crate::pricing::{CancellationPolicyTier, PriceBreakdown, PricingEngine};
use crate::stay::{DateRange, GuestCount};

use super::{
    Actor, BookingCancelledData, BookingCompletedData, BookingConfirmedData, BookingError,
    BookingEvent, BookingRejectedData, BookingRequestedData, BookingStatus, Payment,
    PaymentFailedData, PaymentIntentCreatedData, PaymentProcessingData, PaymentStatus,
    PaymentSucceededData, PaymentVoidedData, PendingRefund, QueuedRefund,
    RefundAttemptFailedData, RefundQueuedData, RefundRequestedData, RefundSettledData,
    SplitPayout,
};

/// Who cancelled, why, and what they were owed.
#[derive(Debug, Clone, PartialEq)]
pub struct Cancellation {
    pub cancelled_by: Actor,
    pub reason: Option<String>,
    pub refund_amount: Money,
    pub cancelled_at: DateTime<Utc>,
}

/// A reservation together with the payment that funds it.
#[derive(Debug, Clone, Default)]
pub struct Booking {
    id: Option<AggregateId>,
    traveler_id: Option<UserId>,
    accommodation_id: Option<AccommodationId>,
    supplier_id: Option<UserId>,
    range: Option<DateRange>,
    guests: GuestCount,
    price: Option<PriceBreakdown>,
    cancellation_policy: Option<CancellationPolicyTier>,
    status: BookingStatus,
    payment: Option<Payment>,
    rejection_reason: Option<String>,
    cancellation: Option<Cancellation>,
    created_at: Option<DateTime<Utc>>,
    confirmed_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    version: Version,
}

impl Aggregate for Booking {
    type Event = BookingEvent;
    type Error = BookingError;

    fn aggregate_type() -> &'static str {
        "Booking"
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
            BookingEvent::BookingRequested(data) => self.apply_requested(data),
            BookingEvent::BookingConfirmed(data) => {
                self.status = BookingStatus::Confirmed;
                self.confirmed_at = Some(data.confirmed_at);
            }
            BookingEvent::BookingRejected(data) => {
                self.status = BookingStatus::Rejected;
                self.rejection_reason = Some(data.reason);
            }
            BookingEvent::BookingCancelled(data) => {
                self.status = BookingStatus::Cancelled;
                self.cancellation = Some(Cancellation {
                    cancelled_by: data.cancelled_by,
                    reason: data.reason,
                    refund_amount: data.refund_amount,
                    cancelled_at: data.cancelled_at,
                });
            }
            BookingEvent::BookingCompleted(data) => {
                self.status = BookingStatus::Completed;
                self.completed_at = Some(data.completed_at);
            }
            payment_event => {
                if let Some(payment) = self.payment.as_mut() {
                    apply_payment_event(payment, payment_event);
                }
            }
        }
    }
}

fn apply_payment_event(payment: &mut Payment, event: BookingEvent) {
    match event {
        BookingEvent::PaymentIntentCreated(data) => {
            payment.intent_id = Some(data.intent_id);
            payment.split = data.split;
            payment.status = PaymentStatus::Pending;
            payment.failure_reason = None;
            payment.intent_attempts += 1;
        }
        BookingEvent::PaymentProcessing(_) => {
            payment.status = PaymentStatus::Processing;
        }
        BookingEvent::PaymentSucceeded(data) => {
            if data.intent_id.is_some() {
                payment.intent_id = data.intent_id;
            }
            payment.transaction_id = Some(data.transaction_id);
            payment.paid_at = Some(data.paid_at);
            payment.failure_reason = None;
            payment.status = PaymentStatus::Completed;
            payment.remember_webhook(data.webhook_event_id);
        }
        BookingEvent::PaymentFailed(data) => {
            payment.status = PaymentStatus::Failed;
            payment.failure_reason = Some(data.reason);
            payment.remember_webhook(data.webhook_event_id);
        }
        BookingEvent::PaymentVoided(_) => {
            payment.status = PaymentStatus::Voided;
        }
        BookingEvent::RefundRequested(data) => {
            payment.refund_requests += 1;
            payment.refund_reason = Some(data.reason.clone());
            payment.pending_refund = Some(PendingRefund {
                amount: data.amount,
                reason: data.reason,
                idempotency_key: data.idempotency_key,
                requested_at: data.requested_at,
                attempts: 0,
                last_error: None,
            });
            payment.queued_refund = None;
            payment.status = PaymentStatus::RefundRequested;
        }
        BookingEvent::RefundQueued(data) => {
            payment.queued_refund = Some(QueuedRefund {
                amount: data.amount,
                reason: data.reason,
                queued_at: data.queued_at,
            });
        }
        BookingEvent::RefundAttemptFailed(data) => {
            if let Some(pending) = payment.pending_refund.as_mut() {
                pending.attempts += 1;
                pending.last_error = Some(data.error);
            }
        }
        BookingEvent::RefundSettled(data) => {
            if let Ok(total) = payment.refunded_amount.try_add(&data.amount) {
                payment.refunded_amount = total;
            }
            let settles_pending = payment
                .pending_refund
                .as_ref()
                .is_some_and(|p| data.amount.amount() >= p.amount.amount());
            if settles_pending {
                payment.pending_refund = None;
            } else if let Some(pending) = payment.pending_refund.as_mut() {
                if let Ok(rest) = pending.amount.try_sub(&data.amount) {
                    pending.amount = rest;
                }
            }
            payment.refunded_at = Some(data.settled_at);
            payment.remember_webhook(data.webhook_event_id);
            payment.status = payment.settled_status();
        }
        BookingEvent::BookingRequested(_)
        | BookingEvent::BookingConfirmed(_)
        | BookingEvent::BookingRejected(_)
        | BookingEvent::BookingCancelled(_)
        | BookingEvent::BookingCompleted(_) => {}
    }
}

impl Booking {
    // Queries

    pub fn traveler_id(&self) -> Option<UserId> {
        self.traveler_id
    }

    pub fn accommodation_id(&self) -> Option<AccommodationId> {
        self.accommodation_id
    }

    pub fn supplier_id(&self) -> Option<UserId> {
        self.supplier_id
    }

    pub fn range(&self) -> Option<DateRange> {
        self.range
    }

    pub fn guests(&self) -> GuestCount {
        self.guests
    }

    pub fn price(&self) -> Option<&PriceBreakdown> {
        self.price.as_ref()
    }

    pub fn cancellation_policy(&self) -> Option<CancellationPolicyTier> {
        self.cancellation_policy
    }

    pub fn status(&self) -> BookingStatus {
        self.status
    }

    pub fn payment(&self) -> Option<&Payment> {
        self.payment.as_ref()
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        self.rejection_reason.as_deref()
    }

    pub fn cancellation(&self) -> Option<&Cancellation> {
        self.cancellation.as_ref()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn confirmed_at(&self) -> Option<DateTime<Utc>> {
        self.confirmed_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Whether money on `intent_id` would be a second charge: the payment
    /// is already paid through a different intent.
    pub fn is_duplicate_charge(&self, intent_id: &str) -> bool {
        self.payment
            .as_ref()
            .is_some_and(|p| p.is_paid() && p.intent_id.as_deref() != Some(intent_id))
    }

    /// Idempotency key for the next payment intent.
    pub fn next_intent_key(&self) -> Option<String> {
        let id = self.id?;
        let attempt = self.payment.as_ref()?.intent_attempts + 1;
        Some(format!("intent-{id}-{attempt}"))
    }

    fn next_refund_key(&self, payment: &Payment) -> Result<String, BookingError> {
        let id = self.id.ok_or(BookingError::NotCreated)?;
        Ok(format!("refund-{id}-{}", payment.refund_requests + 1))
    }

    fn created(&self) -> Result<(AggregateId, &Payment), BookingError> {
        match (self.id, self.payment.as_ref()) {
            (Some(id), Some(payment)) => Ok((id, payment)),
            _ => Err(BookingError::NotCreated),
        }
    }

    fn is_traveler(&self, user_id: UserId) -> bool {
        self.traveler_id == Some(user_id)
    }

    fn is_supplier(&self, user_id: UserId) -> bool {
        self.supplier_id == Some(user_id)
    }

    fn is_party(&self, actor: &Actor) -> bool {
        match actor {
            Actor::Traveler(id) => self.is_traveler(*id),
            Actor::Supplier(id) => self.is_supplier(*id),
            Actor::System => false,
        }
    }

    fn ensure(&self, allowed: bool, action: &'static str) -> Result<(), BookingError> {
        if allowed {
            Ok(())
        } else {
            Err(BookingError::InvalidTransition {
                status: self.status,
                action,
            })
        }
    }

    // Commands

    pub fn request(&self, data: BookingRequestedData) -> Result<Vec<BookingEvent>, BookingError> {
        if self.id.is_some() {
            return Err(BookingError::AlreadyCreated);
        }
        Ok(vec![BookingEvent::BookingRequested(data)])
    }

    pub fn confirm(&self, actor: Actor, now: DateTime<Utc>) -> Result<Vec<BookingEvent>, BookingError> {
        self.created()?;
        self.ensure(self.status.can_confirm(), "confirm")?;
        if !matches!(actor, Actor::Supplier(id) if self.is_supplier(id)) {
            return Err(BookingError::not_permitted(&actor, "confirm"));
        }

        Ok(vec![BookingEvent::BookingConfirmed(BookingConfirmedData {
            confirmed_by: actor,
            confirmed_at: now,
        })])
    }

    /// Supplier declines a pending request. Anything paid is refunded in full.
    pub fn reject(
        &self,
        supplier_id: UserId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<BookingEvent>, BookingError> {
        let (_, payment) = self.created()?;
        self.ensure(self.status.can_reject(), "reject")?;
        if !self.is_supplier(supplier_id) {
            return Err(BookingError::not_permitted(&Actor::Supplier(supplier_id), "reject"));
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(BookingError::ReasonRequired { action: "reject" });
        }

        let mut events = vec![BookingEvent::BookingRejected(BookingRejectedData {
            rejected_by: supplier_id,
            reason: reason.to_string(),
            rejected_at: now,
        })];
        events.extend(self.wind_down_payment(
            payment,
            payment.amount(),
            "booking rejected by supplier",
            now,
        )?);
        Ok(events)
    }

    /// Cancels the booking and settles the payment side.
    ///
    /// A supplier cancellation refunds in full. A traveler cancellation is
    /// refunded per the booking's policy tier, by whole days from `today`
    /// to check-in. A refund already in flight is left alone; the
    /// cancellation refund is queued behind it.
    pub fn cancel(
        &self,
        actor: Actor,
        reason: Option<String>,
        pricing: &PricingEngine,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Vec<BookingEvent>, BookingError> {
        let (_, payment) = self.created()?;
        self.ensure(self.status.can_cancel(), "cancel")?;
        if !self.is_party(&actor) {
            return Err(BookingError::not_permitted(&actor, "cancel"));
        }

        let total = payment.amount();
        let refund_amount = match (actor, self.cancellation_policy, self.range) {
            (Actor::Supplier(_), _, _) => total,
            (_, Some(tier), Some(range)) => {
                let lead_days = (range.check_in() - today).num_days();
                pricing.refund(&total, tier, lead_days)
            }
            _ => Money::zero(total.currency()),
        };

        let mut events = vec![BookingEvent::BookingCancelled(BookingCancelledData {
            cancelled_by: actor,
            reason: reason.filter(|r| !r.trim().is_empty()),
            refund_amount,
            cancelled_at: now,
        })];
        events.extend(self.wind_down_payment(
            payment,
            refund_amount,
            &format!("booking cancelled by {}", actor_role(&actor)),
            now,
        )?);
        Ok(events)
    }

    pub fn complete(&self, actor: Actor, now: DateTime<Utc>) -> Result<Vec<BookingEvent>, BookingError> {
        self.created()?;
        self.ensure(self.status.can_complete(), "complete")?;
        if !self.is_party(&actor) {
            return Err(BookingError::not_permitted(&actor, "complete"));
        }

        Ok(vec![BookingEvent::BookingCompleted(BookingCompletedData {
            completed_by: actor,
            completed_at: now,
        })])
    }

    /// Payment consequence of a booking ending early: refund what was paid,
    /// capped by what is left, or void a payment that never settled.
    fn wind_down_payment(
        &self,
        payment: &Payment,
        refund: Money,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<BookingEvent>, BookingError> {
        if payment.is_paid() {
            let mut available = payment.remaining()?;
            if let Some(pending) = payment.pending_refund.as_ref() {
                available = available.try_sub(&pending.amount)?;
            }
            let amount = refund.min(&available)?;
            if !amount.is_positive() {
                return Ok(vec![]);
            }
            if payment.pending_refund.is_some() {
                return Ok(vec![BookingEvent::RefundQueued(RefundQueuedData {
                    amount,
                    reason: reason.to_string(),
                    queued_at: now,
                })]);
            }
            return Ok(vec![BookingEvent::RefundRequested(RefundRequestedData {
                amount,
                reason: reason.to_string(),
                idempotency_key: self.next_refund_key(payment)?,
                requested_at: now,
            })]);
        }

        if payment.status == PaymentStatus::Voided {
            return Ok(vec![]);
        }
        Ok(vec![BookingEvent::PaymentVoided(PaymentVoidedData {
            reason: reason.to_string(),
            voided_at: now,
        })])
    }

    // Payment commands

    pub fn attach_intent(
        &self,
        intent_id: String,
        idempotency_key: String,
        split: Option<SplitPayout>,
        now: DateTime<Utc>,
    ) -> Result<Vec<BookingEvent>, BookingError> {
        let (_, payment) = self.created()?;
        self.ensure(!self.status.is_terminal(), "create a payment intent for")?;
        if !matches!(payment.status, PaymentStatus::Pending | PaymentStatus::Failed) {
            return Err(BookingError::PaymentState {
                status: payment.status,
                action: "create an intent for",
            });
        }
        if payment.intent_id.as_deref() == Some(intent_id.as_str())
            && payment.status == PaymentStatus::Pending
        {
            return Ok(vec![]);
        }

        Ok(vec![BookingEvent::PaymentIntentCreated(
            PaymentIntentCreatedData {
                intent_id,
                idempotency_key,
                split,
                created_at: now,
            },
        )])
    }

    /// The gateway accepted the charge; settlement is pending.
    pub fn mark_processing(&self, now: DateTime<Utc>) -> Result<Vec<BookingEvent>, BookingError> {
        let (_, payment) = self.created()?;
        if payment.status != PaymentStatus::Pending {
            return Ok(vec![]);
        }
        let intent_id = payment.intent_id.clone().ok_or(BookingError::PaymentState {
            status: payment.status,
            action: "process",
        })?;

        Ok(vec![BookingEvent::PaymentProcessing(PaymentProcessingData {
            intent_id,
            at: now,
        })])
    }

    /// Money arrived on `intent_id`. Confirms a pending booking; on a
    /// booking that already ended, the money is sent straight back.
    ///
    /// An earlier intent that succeeds before the payment is paid becomes
    /// the payment's intent. Once paid, a charge on any other intent is a
    /// duplicate and changes nothing here; see [`Booking::is_duplicate_charge`].
    pub fn record_payment_success(
        &self,
        intent_id: &str,
        transaction_id: String,
        webhook_event_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Vec<BookingEvent>, BookingError> {
        let (_, payment) = self.created()?;
        if webhook_event_id
            .as_deref()
            .is_some_and(|id| payment.has_processed(id))
        {
            return Ok(vec![]);
        }
        if !(payment.status.awaiting_funds() || payment.status == PaymentStatus::Voided) {
            return Ok(vec![]);
        }

        let mut events = vec![BookingEvent::PaymentSucceeded(PaymentSucceededData {
            intent_id: Some(intent_id.to_string()),
            transaction_id,
            webhook_event_id,
            paid_at: now,
        })];

        match self.status {
            BookingStatus::Pending => {
                events.push(BookingEvent::BookingConfirmed(BookingConfirmedData {
                    confirmed_by: Actor::System,
                    confirmed_at: now,
                }));
            }
            BookingStatus::Rejected | BookingStatus::Cancelled => {
                events.push(BookingEvent::RefundRequested(RefundRequestedData {
                    amount: payment.amount(),
                    reason: format!("payment received after booking was {}", self.status),
                    idempotency_key: self.next_refund_key(payment)?,
                    requested_at: now,
                }));
            }
            BookingStatus::Confirmed | BookingStatus::Completed => {}
        }

        Ok(events)
    }

    /// The charge on `intent_id` was declined. Ignored once the payment
    /// moved past it or a newer intent replaced it.
    pub fn record_payment_failure(
        &self,
        intent_id: &str,
        reason: String,
        webhook_event_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Vec<BookingEvent>, BookingError> {
        let (_, payment) = self.created()?;
        if webhook_event_id
            .as_deref()
            .is_some_and(|id| payment.has_processed(id))
        {
            return Ok(vec![]);
        }
        if payment.intent_id.as_deref() != Some(intent_id) {
            return Ok(vec![]);
        }
        if !matches!(
            payment.status,
            PaymentStatus::Pending | PaymentStatus::Processing
        ) {
            return Ok(vec![]);
        }

        Ok(vec![BookingEvent::PaymentFailed(PaymentFailedData {
            reason,
            webhook_event_id,
            failed_at: now,
        })])
    }

    /// Records a refund request. Defaults to everything not yet refunded;
    /// larger amounts are capped to it.
    pub fn request_refund(
        &self,
        amount: Option<Money>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<BookingEvent>, BookingError> {
        let (_, payment) = self.created()?;
        if payment.pending_refund.is_some() {
            return Err(BookingError::RefundInFlight);
        }
        if !payment.status.refundable() {
            return Err(BookingError::PaymentState {
                status: payment.status,
                action: "refund",
            });
        }

        let remaining = payment.remaining()?;
        if !remaining.is_positive() {
            return Err(BookingError::NothingToRefund);
        }
        let requested = amount.unwrap_or(remaining);
        if !requested.is_positive() {
            return Err(BookingError::InvalidRefundAmount { amount: requested });
        }
        let amount = requested.rounded().min(&remaining)?;

        Ok(vec![BookingEvent::RefundRequested(RefundRequestedData {
            amount,
            reason: reason.to_string(),
            idempotency_key: self.next_refund_key(payment)?,
            requested_at: now,
        })])
    }

    pub fn record_refund_failure(
        &self,
        error: String,
        retryable: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<BookingEvent>, BookingError> {
        let (_, payment) = self.created()?;
        if payment.pending_refund.is_none() {
            return Err(BookingError::PaymentState {
                status: payment.status,
                action: "record a refund failure for",
            });
        }

        Ok(vec![BookingEvent::RefundAttemptFailed(
            RefundAttemptFailedData {
                error,
                retryable,
                failed_at: now,
            },
        )])
    }

    /// The gateway confirmed the pending refund.
    pub fn settle_refund(
        &self,
        refund_id: String,
        webhook_event_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Vec<BookingEvent>, BookingError> {
        let (_, payment) = self.created()?;
        if webhook_event_id
            .as_deref()
            .is_some_and(|id| payment.has_processed(id))
        {
            return Ok(vec![]);
        }
        let Some(pending) = payment.pending_refund.as_ref() else {
            return Ok(vec![]);
        };

        let mut events = vec![BookingEvent::RefundSettled(RefundSettledData {
            refund_id,
            amount: pending.amount,
            webhook_event_id,
            settled_at: now,
        })];
        events.extend(self.release_queued_refund(payment, &pending.amount, now)?);
        Ok(events)
    }

    /// Applies the gateway's cumulative refunded total. Only the part not
    /// yet recorded settles; replays and stale totals change nothing.
    pub fn record_gateway_refund(
        &self,
        refund_id: String,
        cumulative: Money,
        webhook_event_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Vec<BookingEvent>, BookingError> {
        let (_, payment) = self.created()?;
        if webhook_event_id
            .as_deref()
            .is_some_and(|id| payment.has_processed(id))
        {
            return Ok(vec![]);
        }
        if !payment.is_paid() {
            return Ok(vec![]);
        }

        let delta = cumulative.try_sub(&payment.refunded_amount)?;
        if !delta.is_positive() {
            return Ok(vec![]);
        }
        let amount = delta.min(&payment.remaining()?)?;
        if !amount.is_positive() {
            return Ok(vec![]);
        }

        let mut events = vec![BookingEvent::RefundSettled(RefundSettledData {
            refund_id,
            amount,
            webhook_event_id,
            settled_at: now,
        })];
        events.extend(self.release_queued_refund(payment, &amount, now)?);
        Ok(events)
    }

    /// Requests the queued refund once `settled` clears the pending one.
    fn release_queued_refund(
        &self,
        payment: &Payment,
        settled: &Money,
        now: DateTime<Utc>,
    ) -> Result<Option<BookingEvent>, BookingError> {
        let (Some(queued), Some(pending)) = (&payment.queued_refund, &payment.pending_refund) else {
            return Ok(None);
        };
        if settled.amount() < pending.amount.amount() {
            return Ok(None);
        }
        let remaining = payment.remaining()?.try_sub(settled)?;
        let amount = queued.amount.min(&remaining)?;
        if !amount.is_positive() {
            return Ok(None);
        }

        Ok(Some(BookingEvent::RefundRequested(RefundRequestedData {
            amount,
            reason: queued.reason.clone(),
            idempotency_key: self.next_refund_key(payment)?,
            requested_at: now,
        })))
    }

    fn apply_requested(&mut self, data: BookingRequestedData) {
        self.id = Some(data.booking_id);
        self.traveler_id = Some(data.traveler_id);
        self.accommodation_id = Some(data.accommodation_id);
        self.supplier_id = Some(data.supplier_id);
        self.range = Some(data.range);
        self.guests = data.guests;
        self.cancellation_policy = Some(data.cancellation_policy);
        self.status = BookingStatus::Pending;
        self.created_at = Some(data.requested_at);
        self.payment = Some(Payment::new(
            data.payment_id,
            data.price.total_price,
            data.payment_method,
            data.payment_provider,
            data.requested_at,
        ));
        self.price = Some(data.price);
    }
}

fn actor_role(actor: &Actor) -> &'static str {
    match actor {
        Actor::Traveler(_) => "traveler",
        Actor::Supplier(_) => "supplier",
        Actor::System => "system",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::PaymentMethod;
    use crate::money::Currency;
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn usd(amount: rust_decimal::Decimal) -> Money {
        Money::new(amount, Currency::USD)
    }

    fn check_in() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 12, 20).unwrap()
    }

    fn price() -> PriceBreakdown {
        PriceBreakdown {
            nights: 3,
            base_price_per_night: usd(dec!(100)),
            total_base_price: usd(dec!(300)),
            service_fee: usd(dec!(30)),
            cleaning_fee: usd(dec!(30)),
            tax_amount: usd(dec!(26.40)),
            discount_amount: usd(dec!(0)),
            total_price: usd(dec!(386.40)),
        }
    }

    struct Parties {
        traveler: UserId,
        supplier: UserId,
    }

    fn requested(tier: CancellationPolicyTier) -> (Booking, Parties) {
        let parties = Parties {
            traveler: UserId::new(),
            supplier: UserId::new(),
        };
        let mut booking = Booking::default();
        let events = booking
            .request(BookingRequestedData {
                booking_id: AggregateId::new(),
                traveler_id: parties.traveler,
                accommodation_id: AccommodationId::new(),
                supplier_id: parties.supplier,
                range: DateRange::new(check_in(), check_in() + Duration::days(3)).unwrap(),
                guests: GuestCount::adults(2),
                price: price(),
                cancellation_policy: tier,
                payment_id: Uuid::new_v4(),
                payment_method: PaymentMethod::Card,
                payment_provider: "STRIPE".to_string(),
                requested_at: Utc::now(),
            })
            .unwrap();
        booking.apply_events(events);
        (booking, parties)
    }

    fn run(
        booking: &mut Booking,
        result: Result<Vec<BookingEvent>, BookingError>,
    ) -> Vec<BookingEvent> {
        let events = result.unwrap();
        booking.apply_events(events.clone());
        events
    }

    fn paid(booking: &mut Booking) {
        let now = Utc::now();
        let intent = booking.attach_intent("pi_1".into(), "intent-key".into(), None, now);
        run(booking, intent);
        let success = booking.record_payment_success("pi_1", "ch_1".into(), Some("evt_paid".into()), now);
        run(booking, success);
    }

    fn payment(booking: &Booking) -> &Payment {
        booking.payment().unwrap()
    }

    #[test]
    fn request_creates_pending_booking_and_payment() {
        let (booking, parties) = requested(CancellationPolicyTier::Flexible);

        assert_eq!(booking.status(), BookingStatus::Pending);
        assert_eq!(booking.traveler_id(), Some(parties.traveler));
        assert_eq!(payment(&booking).status(), PaymentStatus::Pending);
        assert_eq!(payment(&booking).amount(), usd(dec!(386.40)));
        assert!(matches!(
            booking.request(BookingRequestedData {
                booking_id: booking.id().unwrap(),
                traveler_id: parties.traveler,
                accommodation_id: booking.accommodation_id().unwrap(),
                supplier_id: parties.supplier,
                range: booking.range().unwrap(),
                guests: booking.guests(),
                price: price(),
                cancellation_policy: CancellationPolicyTier::Flexible,
                payment_id: Uuid::new_v4(),
                payment_method: PaymentMethod::Card,
                payment_provider: "STRIPE".to_string(),
                requested_at: Utc::now(),
            }),
            Err(BookingError::AlreadyCreated)
        ));
    }

    #[test]
    fn commands_on_missing_booking_fail() {
        let booking = Booking::default();
        assert!(matches!(
            booking.confirm(Actor::Supplier(UserId::new()), Utc::now()),
            Err(BookingError::NotCreated)
        ));
    }

    #[test]
    fn only_the_supplier_confirms() {
        let (mut booking, parties) = requested(CancellationPolicyTier::Flexible);

        assert!(matches!(
            booking.confirm(Actor::Traveler(parties.traveler), Utc::now()),
            Err(BookingError::NotPermitted { .. })
        ));
        assert!(matches!(
            booking.confirm(Actor::Supplier(UserId::new()), Utc::now()),
            Err(BookingError::NotPermitted { .. })
        ));

        let confirm = booking.confirm(Actor::Supplier(parties.supplier), Utc::now());
        run(&mut booking, confirm);
        assert_eq!(booking.status(), BookingStatus::Confirmed);
    }

    #[test]
    fn reject_needs_a_reason_and_voids_unpaid_payment() {
        let (mut booking, parties) = requested(CancellationPolicyTier::Flexible);

        assert!(matches!(
            booking.reject(parties.supplier, "  ", Utc::now()),
            Err(BookingError::ReasonRequired { .. })
        ));

        let reject = booking.reject(parties.supplier, "maintenance", Utc::now());
        run(&mut booking, reject);

        assert_eq!(booking.status(), BookingStatus::Rejected);
        assert_eq!(booking.rejection_reason(), Some("maintenance"));
        assert_eq!(payment(&booking).status(), PaymentStatus::Voided);
    }

    #[test]
    fn reject_refunds_paid_booking_in_full() {
        let (mut booking, parties) = requested(CancellationPolicyTier::Strict);
        let now = Utc::now();
        let intent = booking.attach_intent("pi_1".into(), "k".into(), None, now);
        run(&mut booking, intent);
        let processing = booking.mark_processing(now);
        run(&mut booking, processing);
        // Payment settles through a path that does not auto-confirm.
        booking.apply(BookingEvent::PaymentSucceeded(PaymentSucceededData {
            intent_id: None,
            transaction_id: "ch_1".into(),
            webhook_event_id: None,
            paid_at: now,
        }));

        let reject = booking.reject(parties.supplier, "double booked", now);
        let events = run(&mut booking, reject);

        assert!(matches!(
            &events[1],
            BookingEvent::RefundRequested(data) if data.amount == usd(dec!(386.40))
        ));
        assert_eq!(payment(&booking).status(), PaymentStatus::RefundRequested);
    }

    #[test]
    fn illegal_transitions_are_rejected_in_every_state() {
        let pricing = PricingEngine::default();
        let today = check_in() - Duration::days(30);

        // Terminal states.
        for end in ["reject", "cancel", "complete"] {
            let (mut booking, parties) = requested(CancellationPolicyTier::Flexible);
            let supplier = Actor::Supplier(parties.supplier);
            let now = Utc::now();
            match end {
                "reject" => {
                    let r = booking.reject(parties.supplier, "no", now);
                    run(&mut booking, r);
                }
                "cancel" => {
                    let r = booking.cancel(supplier, None, &pricing, today, now);
                    run(&mut booking, r);
                }
                _ => {
                    let r = booking.confirm(supplier, now);
                    run(&mut booking, r);
                    let r = booking.complete(supplier, now);
                    run(&mut booking, r);
                }
            }
            assert!(booking.status().is_terminal());

            assert!(matches!(
                booking.confirm(supplier, now),
                Err(BookingError::InvalidTransition { action: "confirm", .. })
            ));
            assert!(matches!(
                booking.reject(parties.supplier, "late", now),
                Err(BookingError::InvalidTransition { action: "reject", .. })
            ));
            assert!(matches!(
                booking.cancel(supplier, None, &pricing, today, now),
                Err(BookingError::InvalidTransition { action: "cancel", .. })
            ));
            assert!(matches!(
                booking.complete(supplier, now),
                Err(BookingError::InvalidTransition { action: "complete", .. })
            ));
        }

        // Pending cannot complete; confirmed cannot be confirmed or rejected.
        let (mut booking, parties) = requested(CancellationPolicyTier::Flexible);
        let supplier = Actor::Supplier(parties.supplier);
        assert!(matches!(
            booking.complete(supplier, Utc::now()),
            Err(BookingError::InvalidTransition { .. })
        ));
        let confirm = booking.confirm(supplier, Utc::now());
        run(&mut booking, confirm);
        assert!(matches!(
            booking.confirm(supplier, Utc::now()),
            Err(BookingError::InvalidTransition { .. })
        ));
        assert!(matches!(
            booking.reject(parties.supplier, "no", Utc::now()),
            Err(BookingError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn traveler_cancel_ten_days_out_on_flexible_refunds_everything() {
        let (mut booking, parties) = requested(CancellationPolicyTier::Flexible);
        paid(&mut booking);
        assert_eq!(booking.status(), BookingStatus::Confirmed);

        let today = check_in() - Duration::days(10);
        let cancel = booking.cancel(
            Actor::Traveler(parties.traveler),
            Some("change of plans".into()),
            &PricingEngine::default(),
            today,
            Utc::now(),
        );
        run(&mut booking, cancel);

        let cancellation = booking.cancellation().unwrap();
        assert_eq!(cancellation.refund_amount, usd(dec!(386.40)));
        let pending = payment(&booking).pending_refund().unwrap();
        assert_eq!(pending.amount, usd(dec!(386.40)));
        assert_eq!(
            pending.idempotency_key,
            format!("refund-{}-1", booking.id().unwrap())
        );
    }

    #[test]
    fn traveler_cancel_on_strict_policy_close_to_check_in_refunds_nothing() {
        let (mut booking, parties) = requested(CancellationPolicyTier::Strict);
        paid(&mut booking);

        let cancel = booking.cancel(
            Actor::Traveler(parties.traveler),
            None,
            &PricingEngine::default(),
            check_in() - Duration::days(2),
            Utc::now(),
        );
        let events = run(&mut booking, cancel);

        assert_eq!(events.len(), 1);
        assert_eq!(booking.status(), BookingStatus::Cancelled);
        assert_eq!(payment(&booking).status(), PaymentStatus::Completed);
    }

    #[test]
    fn cancel_with_a_refund_in_flight_queues_the_policy_refund() {
        let (mut booking, parties) = requested(CancellationPolicyTier::Flexible);
        paid(&mut booking);
        let now = Utc::now();
        let goodwill = booking.request_refund(Some(usd(dec!(100))), "goodwill", now);
        run(&mut booking, goodwill);

        let cancel = booking.cancel(
            Actor::Traveler(parties.traveler),
            None,
            &PricingEngine::default(),
            check_in() - Duration::days(10),
            now,
        );
        let events = run(&mut booking, cancel);

        assert_eq!(events.len(), 2);
        assert_eq!(booking.status(), BookingStatus::Cancelled);
        let queued = payment(&booking).queued_refund().unwrap();
        assert_eq!(queued.amount, usd(dec!(286.40)));
        assert_eq!(payment(&booking).pending_refund().unwrap().amount, usd(dec!(100)));

        let settle = booking.settle_refund("re_1".into(), None, now);
        let events = run(&mut booking, settle);

        assert!(matches!(
            &events[1],
            BookingEvent::RefundRequested(data)
                if data.amount == usd(dec!(286.40)) && data.idempotency_key.ends_with("-2")
        ));
        assert!(payment(&booking).queued_refund().is_none());
        assert_eq!(payment(&booking).refunded_amount(), usd(dec!(100)));
        assert_eq!(payment(&booking).status(), PaymentStatus::RefundRequested);
    }

    #[test]
    fn partial_gateway_settlement_keeps_the_queue() {
        let (mut booking, parties) = requested(CancellationPolicyTier::Flexible);
        paid(&mut booking);
        let now = Utc::now();
        let goodwill = booking.request_refund(Some(usd(dec!(100))), "goodwill", now);
        run(&mut booking, goodwill);
        let cancel = booking.cancel(
            Actor::Supplier(parties.supplier),
            None,
            &PricingEngine::default(),
            check_in(),
            now,
        );
        run(&mut booking, cancel);

        let part = booking.record_gateway_refund("re_1".into(), usd(dec!(40)), Some("evt_1".into()), now);
        let events = run(&mut booking, part);

        assert_eq!(events.len(), 1);
        assert_eq!(payment(&booking).pending_refund().unwrap().amount, usd(dec!(60)));
        assert_eq!(payment(&booking).queued_refund().unwrap().amount, usd(dec!(286.40)));
    }

    #[test]
    fn strangers_cannot_cancel() {
        let (booking, _) = requested(CancellationPolicyTier::Flexible);
        let result = booking.cancel(
            Actor::Traveler(UserId::new()),
            None,
            &PricingEngine::default(),
            check_in(),
            Utc::now(),
        );
        assert!(matches!(result, Err(BookingError::NotPermitted { .. })));
    }

    #[test]
    fn late_payment_on_cancelled_booking_is_refunded() {
        let (mut booking, parties) = requested(CancellationPolicyTier::Flexible);
        let now = Utc::now();
        let intent = booking.attach_intent("pi_1".into(), "k".into(), None, now);
        run(&mut booking, intent);
        let cancel = booking.cancel(
            Actor::Traveler(parties.traveler),
            None,
            &PricingEngine::default(),
            check_in() - Duration::days(10),
            now,
        );
        run(&mut booking, cancel);
        assert_eq!(payment(&booking).status(), PaymentStatus::Voided);

        let success = booking.record_payment_success("pi_1", "ch_late".into(), Some("evt_1".into()), now);
        let events = run(&mut booking, success);

        assert_eq!(events.len(), 2);
        assert_eq!(booking.status(), BookingStatus::Cancelled);
        assert_eq!(payment(&booking).status(), PaymentStatus::RefundRequested);
        assert_eq!(
            payment(&booking).pending_refund().unwrap().amount,
            usd(dec!(386.40))
        );
    }

    #[test]
    fn duplicate_and_stale_payment_events_are_noops() {
        let (mut booking, _) = requested(CancellationPolicyTier::Flexible);
        paid(&mut booking);

        let replay = booking
            .record_payment_success("pi_1", "ch_1".into(), Some("evt_paid".into()), Utc::now())
            .unwrap();
        let stale_failure = booking
            .record_payment_failure("pi_1", "card_declined".into(), Some("evt_fail".into()), Utc::now())
            .unwrap();

        assert!(replay.is_empty());
        assert!(stale_failure.is_empty());
        assert_eq!(payment(&booking).status(), PaymentStatus::Completed);
    }

    #[test]
    fn failed_payment_can_get_a_new_intent() {
        let (mut booking, _) = requested(CancellationPolicyTier::Flexible);
        let now = Utc::now();
        let intent = booking.attach_intent("pi_1".into(), "k1".into(), None, now);
        run(&mut booking, intent);
        let failure = booking.record_payment_failure("pi_1", "Your card was declined.".into(), None, now);
        run(&mut booking, failure);
        assert_eq!(payment(&booking).status(), PaymentStatus::Failed);
        assert_eq!(payment(&booking).failure_reason(), Some("Your card was declined."));

        let key = booking.next_intent_key().unwrap();
        assert!(key.ends_with("-2"));
        let retry = booking.attach_intent("pi_2".into(), key, None, now);
        run(&mut booking, retry);

        assert_eq!(payment(&booking).status(), PaymentStatus::Pending);
        assert_eq!(payment(&booking).intent_id(), Some("pi_2"));
    }

    #[test]
    fn replaced_intents_cannot_fail_the_payment() {
        let (mut booking, _) = requested(CancellationPolicyTier::Flexible);
        let now = Utc::now();
        let first = booking.attach_intent("pi_1".into(), "k1".into(), None, now);
        run(&mut booking, first);
        let failure = booking.record_payment_failure("pi_1", "declined".into(), None, now);
        run(&mut booking, failure);
        let second = booking.attach_intent("pi_2".into(), "k2".into(), None, now);
        run(&mut booking, second);

        let stale = booking
            .record_payment_failure("pi_1", "declined again".into(), Some("evt_old".into()), now)
            .unwrap();
        assert!(stale.is_empty());
        assert_eq!(payment(&booking).status(), PaymentStatus::Pending);

        // money on the old intent still pays an unpaid booking
        let success = booking.record_payment_success("pi_1", "ch_1".into(), None, now);
        run(&mut booking, success);
        assert_eq!(payment(&booking).intent_id(), Some("pi_1"));
        assert_eq!(booking.status(), BookingStatus::Confirmed);

        assert!(booking.is_duplicate_charge("pi_2"));
        assert!(!booking.is_duplicate_charge("pi_1"));
        let twice = booking
            .record_payment_success("pi_2", "ch_2".into(), Some("evt_new".into()), now)
            .unwrap();
        assert!(twice.is_empty());
        assert_eq!(payment(&booking).transaction_id(), Some("ch_1"));
    }

    #[test]
    fn partial_then_remaining_refund() {
        let (mut booking, _) = requested(CancellationPolicyTier::Flexible);
        paid(&mut booking);
        let now = Utc::now();

        let first = booking.request_refund(Some(usd(dec!(50))), "goodwill", now);
        run(&mut booking, first);
        assert!(matches!(
            booking.request_refund(None, "again", now),
            Err(BookingError::RefundInFlight)
        ));
        let settle = booking.settle_refund("re_1".into(), None, now);
        run(&mut booking, settle);

        assert_eq!(payment(&booking).status(), PaymentStatus::PartiallyRefunded);
        assert_eq!(payment(&booking).refunded_amount(), usd(dec!(50)));

        let second = booking.request_refund(Some(usd(dec!(336.40))), "rest", now);
        let events = run(&mut booking, second);
        assert!(matches!(
            &events[0],
            BookingEvent::RefundRequested(data) if data.idempotency_key.ends_with("-2")
        ));
        let settle = booking.settle_refund("re_2".into(), None, now);
        run(&mut booking, settle);

        assert_eq!(payment(&booking).status(), PaymentStatus::Refunded);
        assert_eq!(payment(&booking).refunded_amount(), usd(dec!(386.40)));
        assert!(matches!(
            booking.request_refund(None, "more", now),
            Err(BookingError::PaymentState { .. })
        ));
    }

    #[test]
    fn refund_requires_settled_money() {
        let (booking, _) = requested(CancellationPolicyTier::Flexible);
        assert!(matches!(
            booking.request_refund(None, "nope", Utc::now()),
            Err(BookingError::PaymentState { .. })
        ));
    }

    #[test]
    fn oversized_refund_is_capped_and_zero_is_invalid() {
        let (mut booking, _) = requested(CancellationPolicyTier::Flexible);
        paid(&mut booking);

        assert!(matches!(
            booking.request_refund(Some(usd(dec!(0))), "zero", Utc::now()),
            Err(BookingError::InvalidRefundAmount { .. })
        ));

        let events = booking
            .request_refund(Some(usd(dec!(1000))), "too much", Utc::now())
            .unwrap();
        assert!(matches!(
            &events[0],
            BookingEvent::RefundRequested(data) if data.amount == usd(dec!(386.40))
        ));
    }

    #[test]
    fn gateway_refund_totals_apply_as_deltas() {
        let (mut booking, _) = requested(CancellationPolicyTier::Flexible);
        paid(&mut booking);
        let now = Utc::now();

        let first = booking.record_gateway_refund("re_1".into(), usd(dec!(50)), Some("evt_r1".into()), now);
        run(&mut booking, first);
        assert_eq!(payment(&booking).refunded_amount(), usd(dec!(50)));

        let stale = booking
            .record_gateway_refund("re_1".into(), usd(dec!(50)), Some("evt_r1b".into()), now)
            .unwrap();
        assert!(stale.is_empty());

        let replay = booking
            .record_gateway_refund("re_1".into(), usd(dec!(386.40)), Some("evt_r1".into()), now)
            .unwrap();
        assert!(replay.is_empty());

        let rest = booking.record_gateway_refund("re_2".into(), usd(dec!(386.40)), Some("evt_r2".into()), now);
        run(&mut booking, rest);
        assert_eq!(payment(&booking).status(), PaymentStatus::Refunded);
    }

    #[test]
    fn refund_failures_keep_the_request_pending() {
        let (mut booking, _) = requested(CancellationPolicyTier::Flexible);
        paid(&mut booking);
        let now = Utc::now();
        let request = booking.request_refund(None, "full", now);
        run(&mut booking, request);
        let key = payment(&booking).pending_refund().unwrap().idempotency_key.clone();

        let failure = booking.record_refund_failure("timeout".into(), true, now);
        run(&mut booking, failure);

        let pending = payment(&booking).pending_refund().unwrap();
        assert_eq!(pending.attempts, 1);
        assert_eq!(pending.last_error.as_deref(), Some("timeout"));
        assert_eq!(pending.idempotency_key, key);
        assert_eq!(payment(&booking).status(), PaymentStatus::RefundRequested);
    }
}
