//! Traveler bookings read model: each traveler's trips with their status.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use common::{AccommodationId, AggregateId, UserId};
use domain::booking::BookingEvent;
use domain::{BookingStatus, Money, PaymentStatus};
use event_store::EventEnvelope;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::Result;
use crate::projection::{Projection, ProjectionPosition};
use crate::read_model::ReadModel;

use super::BOOKING_STREAM;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookingSummary {
    pub booking_id: AggregateId,
    pub accommodation_id: AccommodationId,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub total: Money,
    pub refunded: Money,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
}

struct TravelerBookingsState {
    summaries: HashMap<AggregateId, BookingSummary>,
    by_traveler: HashMap<UserId, Vec<AggregateId>>,
    position: ProjectionPosition,
}

/// Bookings grouped by traveler, newest request last.
#[derive(Clone)]
pub struct TravelerBookingsView {
    state: Arc<RwLock<TravelerBookingsState>>,
}

impl TravelerBookingsView {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(TravelerBookingsState {
                summaries: HashMap::new(),
                by_traveler: HashMap::new(),
                position: ProjectionPosition::zero(),
            })),
        }
    }

    pub async fn for_traveler(&self, traveler_id: UserId) -> Vec<BookingSummary> {
        let state = self.state.read().await;
        state
            .by_traveler
            .get(&traveler_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.summaries.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Trips that still hold nights.
    pub async fn upcoming(&self, traveler_id: UserId) -> Vec<BookingSummary> {
        self.for_traveler(traveler_id)
            .await
            .into_iter()
            .filter(|s| s.status.holds_inventory())
            .collect()
    }

    pub async fn get(&self, booking_id: AggregateId) -> Option<BookingSummary> {
        self.state.read().await.summaries.get(&booking_id).cloned()
    }
}

impl Default for TravelerBookingsView {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Projection for TravelerBookingsView {
    fn name(&self) -> &'static str {
        "TravelerBookingsView"
    }

    fn streams(&self) -> &'static [&'static str] {
        &[BOOKING_STREAM]
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        if !self.follows(event) {
            let mut state = self.state.write().await;
            state.position = state.position.after(event);
            return Ok(());
        }

        let booking_event: BookingEvent = serde_json::from_value(event.payload.clone())?;
        let booking_id = event.aggregate_id;

        let mut state = self.state.write().await;

        if let BookingEvent::BookingRequested(data) = &booking_event {
            state.summaries.insert(
                booking_id,
                BookingSummary {
                    booking_id,
                    accommodation_id: data.accommodation_id,
                    check_in: data.range.check_in(),
                    check_out: data.range.check_out(),
                    total: data.price.total_price,
                    refunded: Money::zero(data.price.total_price.currency()),
                    status: BookingStatus::Pending,
                    payment_status: PaymentStatus::Pending,
                },
            );
            state
                .by_traveler
                .entry(data.traveler_id)
                .or_default()
                .push(booking_id);
        } else if let Some(summary) = state.summaries.get_mut(&booking_id) {
            match booking_event {
                BookingEvent::BookingConfirmed(_) => summary.status = BookingStatus::Confirmed,
                BookingEvent::BookingRejected(_) => summary.status = BookingStatus::Rejected,
                BookingEvent::BookingCancelled(_) => summary.status = BookingStatus::Cancelled,
                BookingEvent::BookingCompleted(_) => summary.status = BookingStatus::Completed,
                BookingEvent::PaymentIntentCreated(_)
                | BookingEvent::RefundQueued(_)
                | BookingEvent::RefundAttemptFailed(_) => {}
                BookingEvent::PaymentProcessing(_) => {
                    summary.payment_status = PaymentStatus::Processing;
                }
                BookingEvent::PaymentSucceeded(_) => {
                    summary.payment_status = PaymentStatus::Completed;
                }
                BookingEvent::PaymentFailed(_) => summary.payment_status = PaymentStatus::Failed,
                BookingEvent::PaymentVoided(_) => summary.payment_status = PaymentStatus::Voided,
                BookingEvent::RefundRequested(_) => {
                    summary.payment_status = PaymentStatus::RefundRequested;
                }
                BookingEvent::RefundSettled(data) => {
                    if let Ok(refunded) = summary.refunded.try_add(&data.amount) {
                        summary.refunded = refunded;
                    }
                    summary.payment_status = if summary.refunded.amount() >= summary.total.amount() {
                        PaymentStatus::Refunded
                    } else {
                        PaymentStatus::PartiallyRefunded
                    };
                }
                BookingEvent::BookingRequested(_) => {}
            }
        }

        state.position = state.position.after(event);
        Ok(())
    }

    async fn position(&self) -> ProjectionPosition {
        self.state.read().await.position
    }

    async fn reset(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.summaries.clear();
        state.by_traveler.clear();
        state.position = ProjectionPosition::zero();
        Ok(())
    }
}

#[async_trait]
impl ReadModel for TravelerBookingsView {
    type Row = BookingSummary;

    fn name(&self) -> &'static str {
        "TravelerBookingsView"
    }

    async fn count(&self) -> usize {
        self.state.read().await.summaries.len()
    }

    async fn rows(&self) -> Vec<BookingSummary> {
        self.state.read().await.summaries.values().cloned().collect()
    }
}
