//! Append-only event storage.
//!
//! Streams are addressed by [`AggregateId`] and guarded by optimistic
//! concurrency on their [`Version`]. [`EventStore::append_atomic`] commits
//! several streams in one transaction; the reservation core relies on it to
//! write a booking and its calendar hold together.

pub mod error;
pub mod event;
pub mod memory;
pub mod store;

pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventEnvelopeBuilder, EventId, Version};
pub use memory::InMemoryEventStore;
pub use store::{AppendOptions, EventStore, EventStoreExt, EventStream, StreamAppend};
