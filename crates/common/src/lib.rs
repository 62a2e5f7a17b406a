//! Identifier types shared by every crate of the reservation core.

pub mod types;

pub use types::{AccommodationId, AggregateId, UserId};
