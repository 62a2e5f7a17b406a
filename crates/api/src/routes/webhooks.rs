//! Payment provider webhook intake.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use event_store::EventStore;
use payments::WebhookEffect;

use crate::AppState;
use crate::error::ApiError;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// POST /webhooks/payments
///
/// The body is passed on untouched; the signature covers its exact bytes.
pub async fn receive<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookEffect>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Missing Stripe-Signature header".to_string()))?;

    let effect = state.payments.reconcile_webhook(&body, signature).await?;
    Ok(Json(effect))
}
