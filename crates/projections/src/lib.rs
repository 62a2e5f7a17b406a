//! Read models for the reservation core's query side.
//!
//! - [`Projection`] processes stored events into a read model
//! - [`ReadModel`] gives query access to the denormalized data
//! - [`ProjectionProcessor`] feeds events from the store to projections
//! - Views: per-accommodation booking stats, per-traveler bookings

pub mod error;
pub mod processor;
pub mod projection;
pub mod read_model;
pub mod views;

pub use error::{ProjectionError, Result};
pub use processor::ProjectionProcessor;
pub use projection::{Projection, ProjectionPosition};
pub use read_model::ReadModel;
pub use views::{AccommodationStats, AccommodationStatsView, BookingSummary, TravelerBookingsView};
