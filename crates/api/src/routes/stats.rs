//! Per-accommodation booking stats.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::AccommodationId;
use event_store::EventStore;
use projections::AccommodationStats;

use crate::AppState;
use crate::error::ApiError;

/// GET /accommodations/{id}/stats
///
/// Catches the projections up first, so bookings written moments ago count.
pub async fn accommodation<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<AccommodationStats>, ApiError> {
    let accommodation_id: AccommodationId = id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid accommodation ID: {id}")))?;

    state.processor.run_catch_up().await?;

    state
        .accommodation_stats
        .get(accommodation_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No bookings for accommodation {id}")))
}
