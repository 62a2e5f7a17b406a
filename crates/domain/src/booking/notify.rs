//! Outbound notifications about bookings and payments.
//!
//! Delivery is best effort: a failed notification is logged and never
//! undoes the state change that triggered it.

use std::sync::Arc;

use async_trait::async_trait;
use common::{AggregateId, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::money::Money;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    BookingRequested {
        booking_id: AggregateId,
        traveler_id: UserId,
        supplier_id: UserId,
    },
    BookingConfirmed {
        booking_id: AggregateId,
        traveler_id: UserId,
    },
    BookingRejected {
        booking_id: AggregateId,
        traveler_id: UserId,
        reason: String,
    },
    BookingCancelled {
        booking_id: AggregateId,
        traveler_id: UserId,
        supplier_id: UserId,
        refund_amount: Money,
    },
    PaymentReceived {
        booking_id: AggregateId,
        traveler_id: UserId,
        amount: Money,
    },
    PaymentRefunded {
        booking_id: AggregateId,
        traveler_id: UserId,
        amount: Money,
    },
}

impl Notification {
    pub fn booking_id(&self) -> AggregateId {
        match self {
            Notification::BookingRequested { booking_id, .. }
            | Notification::BookingConfirmed { booking_id, .. }
            | Notification::BookingRejected { booking_id, .. }
            | Notification::BookingCancelled { booking_id, .. }
            | Notification::PaymentReceived { booking_id, .. }
            | Notification::PaymentRefunded { booking_id, .. } => *booking_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Notification::BookingRequested { .. } => "booking_requested",
            Notification::BookingConfirmed { .. } => "booking_confirmed",
            Notification::BookingRejected { .. } => "booking_rejected",
            Notification::BookingCancelled { .. } => "booking_cancelled",
            Notification::PaymentReceived { .. } => "payment_received",
            Notification::PaymentRefunded { .. } => "payment_refunded",
        }
    }
}

#[derive(Debug, Error)]
#[error("Notification delivery failed: {0}")]
pub struct NotifyError(pub String);

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError>;
}

/// Sends nowhere; records each notification as a log line.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        tracing::info!(
            notification = notification.name(),
            booking_id = %notification.booking_id(),
            "notification"
        );
        Ok(())
    }
}

/// Keeps notifications in memory. Can be switched to fail every delivery.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
    failing: Arc<std::sync::atomic::AtomicBool>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(NotifyError(format!(
                "{} undeliverable",
                notification.name()
            )));
        }
        self.sent.lock().await.push(notification);
        Ok(())
    }
}

/// Delivers a notification, logging instead of propagating failure.
pub(crate) async fn dispatch(notifier: &dyn Notifier, notification: Notification) {
    let name = notification.name();
    let booking_id = notification.booking_id();
    if let Err(e) = notifier.notify(notification).await {
        tracing::warn!(notification = name, %booking_id, error = %e, "notification not delivered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn confirmed() -> Notification {
        Notification::BookingConfirmed {
            booking_id: AggregateId::new(),
            traveler_id: UserId::new(),
        }
    }

    #[tokio::test]
    async fn in_memory_notifier_records() {
        let notifier = InMemoryNotifier::new();
        let notification = confirmed();

        dispatch(&notifier, notification.clone()).await;

        assert_eq!(notifier.sent().await, vec![notification]);
    }

    #[tokio::test]
    async fn failures_are_swallowed_by_dispatch() {
        let notifier = InMemoryNotifier::new();
        notifier.set_failing(true);

        dispatch(&notifier, confirmed()).await;

        assert!(notifier.sent().await.is_empty());
        assert!(notifier.notify(confirmed()).await.is_err());
    }
}
