use common::{AccommodationId, AggregateId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::stay::DateRange;

/// Nights of an accommodation that were just taken or given back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityChange {
    pub accommodation_id: AccommodationId,
    pub booking_id: AggregateId,
    pub range: DateRange,
    /// `true` when the nights became free.
    pub available: bool,
}

/// Fan-out of availability changes to live viewers.
///
/// Publishing never blocks and never fails: with no subscribers the change
/// is dropped, and slow subscribers observe `Lagged` on their side.
#[derive(Debug, Clone)]
pub struct AvailabilityBroadcaster {
    sender: broadcast::Sender<AvailabilityChange>,
}

impl AvailabilityBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AvailabilityChange> {
        self.sender.subscribe()
    }

    pub fn publish(&self, change: AvailabilityChange) {
        if self.sender.send(change).is_err() {
            tracing::trace!("no availability subscribers");
        }
    }
}

impl Default for AvailabilityBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
