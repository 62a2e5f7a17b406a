//! Projection seam and position tracking.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_store::EventEnvelope;

use crate::Result;

/// How far into the global event log a projection has read.
///
/// Events from streams a projection does not follow still move it forward,
/// so the count always matches the log index of the last event seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectionPosition {
    pub events_seen: u64,
    /// Store timestamp of the last event seen.
    pub last_event_at: Option<DateTime<Utc>>,
}

impl ProjectionPosition {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn after(&self, event: &EventEnvelope) -> Self {
        Self {
            events_seen: self.events_seen + 1,
            last_event_at: Some(event.timestamp),
        }
    }

    /// Whether the event at `log_index` (1-based) still has to be delivered.
    pub fn is_behind(&self, log_index: u64) -> bool {
        self.events_seen < log_index
    }
}

impl std::fmt::Display for ProjectionPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.last_event_at {
            Some(at) => write!(f, "{} events, last at {}", self.events_seen, at.to_rfc3339()),
            None => write!(f, "{} events", self.events_seen),
        }
    }
}

/// Folds stored events into a read model.
#[async_trait]
pub trait Projection: Send + Sync {
    fn name(&self) -> &'static str;

    /// Stream kinds this projection folds.
    fn streams(&self) -> &'static [&'static str];

    fn follows(&self, event: &EventEnvelope) -> bool {
        self.streams().contains(&event.aggregate_type.as_str())
    }

    /// Folds one event. Called for every event in the log, including
    /// ones from streams the projection does not follow.
    async fn handle(&self, event: &EventEnvelope) -> Result<()>;

    async fn position(&self) -> ProjectionPosition;

    /// Drops the read model so a replay can rebuild it.
    async fn reset(&self) -> Result<()>;
}
