//! Accommodation stats read model: the booking counter and revenue per listing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{AccommodationId, AggregateId};
use domain::Money;
use domain::booking::BookingEvent;
use event_store::EventEnvelope;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::Result;
use crate::projection::{Projection, ProjectionPosition};
use crate::read_model::ReadModel;

use super::BOOKING_STREAM;

/// Booking activity for one accommodation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccommodationStats {
    pub accommodation_id: AccommodationId,
    pub requested: u64,
    /// The booking counter: bookings that reached CONFIRMED.
    pub confirmed: u64,
    pub rejected: u64,
    pub cancelled: u64,
    pub completed: u64,
    /// Totals of confirmed bookings. `None` until the first confirmation.
    pub gross_revenue: Option<Money>,
    /// Refunds the gateway has settled.
    pub refunded: Option<Money>,
}

impl AccommodationStats {
    fn new(accommodation_id: AccommodationId) -> Self {
        Self {
            accommodation_id,
            requested: 0,
            confirmed: 0,
            rejected: 0,
            cancelled: 0,
            completed: 0,
            gross_revenue: None,
            refunded: None,
        }
    }

    /// Gross revenue less settled refunds.
    pub fn net_revenue(&self) -> Option<Money> {
        match (self.gross_revenue, self.refunded) {
            (Some(gross), Some(refunded)) => gross.try_sub(&refunded).ok(),
            (gross, _) => gross,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TrackedBooking {
    accommodation_id: AccommodationId,
    total: Money,
}

struct AccommodationStatsState {
    stats: HashMap<AccommodationId, AccommodationStats>,
    bookings: HashMap<AggregateId, TrackedBooking>,
    position: ProjectionPosition,
}

/// Per-accommodation counters fed from booking events.
///
/// Listings are never mutated by bookings; the counter lives here.
#[derive(Clone)]
pub struct AccommodationStatsView {
    state: Arc<RwLock<AccommodationStatsState>>,
}

impl AccommodationStatsView {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(AccommodationStatsState {
                stats: HashMap::new(),
                bookings: HashMap::new(),
                position: ProjectionPosition::zero(),
            })),
        }
    }

    pub async fn get(&self, accommodation_id: AccommodationId) -> Option<AccommodationStats> {
        self.state.read().await.stats.get(&accommodation_id).cloned()
    }

    /// Listings ordered by confirmed bookings, most first.
    pub async fn most_booked(&self, limit: usize) -> Vec<AccommodationStats> {
        let state = self.state.read().await;
        let mut stats: Vec<_> = state.stats.values().cloned().collect();
        stats.sort_by(|a, b| b.confirmed.cmp(&a.confirmed));
        stats.truncate(limit);
        stats
    }
}

impl Default for AccommodationStatsView {
    fn default() -> Self {
        Self::new()
    }
}

fn accumulate(total: &mut Option<Money>, amount: Money, accommodation_id: AccommodationId) {
    *total = match total.take() {
        None => Some(amount),
        Some(current) => match current.try_add(&amount) {
            Ok(sum) => Some(sum),
            Err(e) => {
                tracing::warn!(%accommodation_id, error = %e, "skipping amount in stats");
                Some(current)
            }
        },
    };
}

#[async_trait]
impl Projection for AccommodationStatsView {
    fn name(&self) -> &'static str {
        "AccommodationStatsView"
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

        let mut guard = self.state.write().await;
        let state = &mut *guard;

        if let BookingEvent::BookingRequested(data) = &booking_event {
            state.bookings.insert(
                booking_id,
                TrackedBooking {
                    accommodation_id: data.accommodation_id,
                    total: data.price.total_price,
                },
            );
        }

        if let Some(tracked) = state.bookings.get(&booking_id).copied() {
            let stats = state
                .stats
                .entry(tracked.accommodation_id)
                .or_insert_with(|| AccommodationStats::new(tracked.accommodation_id));

            match &booking_event {
                BookingEvent::BookingRequested(_) => stats.requested += 1,
                BookingEvent::BookingConfirmed(_) => {
                    stats.confirmed += 1;
                    accumulate(&mut stats.gross_revenue, tracked.total, tracked.accommodation_id);
                }
                BookingEvent::BookingRejected(_) => stats.rejected += 1,
                BookingEvent::BookingCancelled(_) => stats.cancelled += 1,
                BookingEvent::BookingCompleted(_) => stats.completed += 1,
                BookingEvent::RefundSettled(data) => {
                    accumulate(&mut stats.refunded, data.amount, tracked.accommodation_id);
                }
                // Payment progress does not move the counters
                BookingEvent::PaymentIntentCreated(_)
                | BookingEvent::PaymentProcessing(_)
                | BookingEvent::PaymentSucceeded(_)
                | BookingEvent::PaymentFailed(_)
                | BookingEvent::PaymentVoided(_)
                | BookingEvent::RefundRequested(_)
                | BookingEvent::RefundQueued(_)
                | BookingEvent::RefundAttemptFailed(_) => {}
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
        state.stats.clear();
        state.bookings.clear();
        state.position = ProjectionPosition::zero();
        Ok(())
    }
}

#[async_trait]
impl ReadModel for AccommodationStatsView {
    type Row = AccommodationStats;

    fn name(&self) -> &'static str {
        "AccommodationStatsView"
    }

    async fn count(&self) -> usize {
        self.state.read().await.stats.len()
    }

    async fn rows(&self) -> Vec<AccommodationStats> {
        self.state.read().await.stats.values().cloned().collect()
    }
}
