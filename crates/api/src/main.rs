//! API server entry point.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use domain::booking::LogNotifier;
use domain::{BookingLifecycleManager, FeeDefaults, InMemoryCatalog};
use event_store::InMemoryEventStore;
use payments::{InMemoryGateway, PaymentConfig, PaymentGateway, StripeGateway};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

fn payment_gateway(config: &PaymentConfig) -> Arc<dyn PaymentGateway> {
    match &config.stripe_secret_key {
        Some(key) => Arc::new(StripeGateway::with_api_base(
            key.clone(),
            config.stripe_api_base.clone(),
        )),
        None => {
            tracing::warn!("STRIPE_SECRET_KEY not set, payments go to the in-memory gateway");
            Arc::new(InMemoryGateway::new())
        }
    }
}

#[tokio::main]
async fn main() {
    // 1. Configuration and tracing
    let config = Config::from_env();
    init_tracing(&config);
    let payment_config = PaymentConfig::from_env();
    if payment_config.webhook_secret.is_empty() {
        tracing::warn!("PAYMENT_WEBHOOK_SECRET not set, every webhook will be rejected");
    }

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Event store, collaborators and application state
    let event_store = InMemoryEventStore::new();
    let gateway = payment_gateway(&payment_config);
    let bookings = BookingLifecycleManager::new(
        event_store,
        Arc::new(InMemoryCatalog::new()),
        Arc::new(LogNotifier),
    )
    .with_fee_defaults(FeeDefaults::from_env())
    .with_payment_provider(payment_config.provider.clone());
    let state = api::create_state(bookings, gateway, payment_config);

    // 4. Run catch-up on projections (replay any existing events)
    state
        .processor
        .run_catch_up()
        .await
        .expect("projection catch-up failed");

    // 5. Build the application and serve
    let app = api::create_app(state, metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("server shut down gracefully");
}
