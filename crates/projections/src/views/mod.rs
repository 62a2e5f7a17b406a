//! Read model views for the query side.

pub mod accommodation_stats;
pub mod traveler_bookings;

pub use accommodation_stats::{AccommodationStats, AccommodationStatsView};
pub use traveler_bookings::{BookingSummary, TravelerBookingsView};

/// Booking stream kind, as written by the domain's command handler.
pub(crate) const BOOKING_STREAM: &str = "Booking";
