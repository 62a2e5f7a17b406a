//! Core aggregate and domain event traits.

use common::AggregateId;
use event_store::Version;
use serde::{Serialize, de::DeserializeOwned};

/// A fact recorded on a stream. Named in the past tense.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Name stored in the envelope; used for filtering by type.
    fn event_type(&self) -> &'static str;
}

/// An event-sourced consistency boundary.
///
/// State is rebuilt by replaying events through [`Aggregate::apply`], which
/// must be pure and infallible. Commands are plain methods on the aggregate
/// that inspect the current state and return the events to record, or a
/// typed error naming the violated precondition.
pub trait Aggregate: Default + Send + Sync + Sized {
    type Event: DomainEvent;

    type Error: std::error::Error + Send + Sync;

    /// Stream kind stored on every envelope.
    fn aggregate_type() -> &'static str;

    /// `None` until the first event has been applied.
    fn id(&self) -> Option<AggregateId>;

    fn version(&self) -> Version;

    fn set_version(&mut self, version: Version);

    fn apply(&mut self, event: Self::Event);

    fn apply_events(&mut self, events: impl IntoIterator<Item = Self::Event>) {
        for event in events {
            self.apply(event);
        }
    }
}
