//! HTTP ingress for the reservation core.
//!
//! Receives signed payment-provider webhooks, serves per-accommodation
//! booking stats from the projections, and exposes health and Prometheus
//! metrics. Structured logging comes from the tracing layer.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use domain::BookingLifecycleManager;
use event_store::EventStore;
use metrics_exporter_prometheus::PrometheusHandle;
use payments::{PaymentConfig, PaymentGateway, PaymentOrchestrator};
use projections::{AccommodationStatsView, Projection, ProjectionProcessor, TravelerBookingsView};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
pub struct AppState<S: EventStore + Clone> {
    pub payments: PaymentOrchestrator<S>,
    pub processor: Arc<ProjectionProcessor<S>>,
    pub accommodation_stats: AccommodationStatsView,
    pub traveler_bookings: TravelerBookingsView,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: EventStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/webhooks/payments", post(routes::webhooks::receive::<S>))
        .route(
            "/accommodations/{id}/stats",
            get(routes::stats::accommodation::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Wires the orchestrator and the read models over one store.
pub fn create_state<S: EventStore + Clone + 'static>(
    bookings: BookingLifecycleManager<S>,
    gateway: Arc<dyn PaymentGateway>,
    payment_config: PaymentConfig,
) -> Arc<AppState<S>> {
    let accommodation_stats = AccommodationStatsView::new();
    let traveler_bookings = TravelerBookingsView::new();

    let mut processor = ProjectionProcessor::new(bookings.store().clone());
    processor.register(Box::new(accommodation_stats.clone()) as Box<dyn Projection>);
    processor.register(Box::new(traveler_bookings.clone()) as Box<dyn Projection>);

    Arc::new(AppState {
        payments: PaymentOrchestrator::new(Arc::new(bookings), gateway, payment_config),
        processor: Arc::new(processor),
        accommodation_stats,
        traveler_bookings,
    })
}
