//! Booking domain events.
//!
//! Booking and payment facts share one stream, so a lifecycle transition
//! and the payment consequence it triggers are recorded atomically.

use chrono::{DateTime, Utc};
use common::{AccommodationId, AggregateId, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::DomainEvent;
use crate::money::Money;
use crate::pricing::{CancellationPolicyTier, PriceBreakdown};
use crate::stay::{DateRange, GuestCount};

use super::{Actor, PaymentMethod, SplitPayout};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum BookingEvent {
    /// A traveler reserved a stay; the payment was opened with it.
    BookingRequested(BookingRequestedData),

    BookingConfirmed(BookingConfirmedData),

    BookingRejected(BookingRejectedData),

    BookingCancelled(BookingCancelledData),

    BookingCompleted(BookingCompletedData),

    /// The gateway issued a payment intent for the booking.
    PaymentIntentCreated(PaymentIntentCreatedData),

    /// The gateway accepted the charge but has not settled it.
    PaymentProcessing(PaymentProcessingData),

    PaymentSucceeded(PaymentSucceededData),

    PaymentFailed(PaymentFailedData),

    /// The booking ended before money moved.
    PaymentVoided(PaymentVoidedData),

    /// A refund of a fixed amount was decided; the gateway call follows.
    RefundRequested(RefundRequestedData),

    /// A refund decided while another is pending. Requested once that
    /// one settles.
    RefundQueued(RefundQueuedData),

    /// The gateway refund call failed; the request stays pending.
    RefundAttemptFailed(RefundAttemptFailedData),

    /// The gateway confirmed a refund.
    RefundSettled(RefundSettledData),
}

impl DomainEvent for BookingEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BookingEvent::BookingRequested(_) => "BookingRequested",
            BookingEvent::BookingConfirmed(_) => "BookingConfirmed",
            BookingEvent::BookingRejected(_) => "BookingRejected",
            BookingEvent::BookingCancelled(_) => "BookingCancelled",
            BookingEvent::BookingCompleted(_) => "BookingCompleted",
            BookingEvent::PaymentIntentCreated(_) => "PaymentIntentCreated",
            BookingEvent::PaymentProcessing(_) => "PaymentProcessing",
            BookingEvent::PaymentSucceeded(_) => "PaymentSucceeded",
            BookingEvent::PaymentFailed(_) => "PaymentFailed",
            BookingEvent::PaymentVoided(_) => "PaymentVoided",
            BookingEvent::RefundRequested(_) => "RefundRequested",
            BookingEvent::RefundQueued(_) => "RefundQueued",
            BookingEvent::RefundAttemptFailed(_) => "RefundAttemptFailed",
            BookingEvent::RefundSettled(_) => "RefundSettled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingRequestedData {
    pub booking_id: AggregateId,
    pub traveler_id: UserId,
    pub accommodation_id: AccommodationId,
    /// Copied from the listing at request time.
    pub supplier_id: UserId,
    pub range: DateRange,
    pub guests: GuestCount,
    pub price: PriceBreakdown,
    /// Policy in force at request time; later listing edits do not apply.
    pub cancellation_policy: CancellationPolicyTier,
    pub payment_id: Uuid,
    pub payment_method: PaymentMethod,
    pub payment_provider: String,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingConfirmedData {
    pub confirmed_by: Actor,
    pub confirmed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingRejectedData {
    pub rejected_by: UserId,
    pub reason: String,
    pub rejected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingCancelledData {
    pub cancelled_by: Actor,
    pub reason: Option<String>,
    /// Refund owed under the policy at cancellation time.
    pub refund_amount: Money,
    pub cancelled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingCompletedData {
    pub completed_by: Actor,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntentCreatedData {
    pub intent_id: String,
    pub idempotency_key: String,
    pub split: Option<SplitPayout>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentProcessingData {
    pub intent_id: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSucceededData {
    /// Intent that was charged. Becomes the payment's intent.
    #[serde(default)]
    pub intent_id: Option<String>,
    pub transaction_id: String,
    /// Set when the success arrived by webhook.
    pub webhook_event_id: Option<String>,
    pub paid_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentFailedData {
    /// Provider's failure message, verbatim.
    pub reason: String,
    pub webhook_event_id: Option<String>,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentVoidedData {
    pub reason: String,
    pub voided_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequestedData {
    pub amount: Money,
    pub reason: String,
    pub idempotency_key: String,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundQueuedData {
    pub amount: Money,
    pub reason: String,
    pub queued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundAttemptFailedData {
    pub error: String,
    pub retryable: bool,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundSettledData {
    pub refund_id: String,
    pub amount: Money,
    pub webhook_event_id: Option<String>,
    pub settled_at: DateTime<Utc>,
}
