pub mod health;
pub mod metrics;
pub mod stats;
pub mod webhooks;
