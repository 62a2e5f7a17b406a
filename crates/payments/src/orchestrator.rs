//! Payment orchestration on top of the booking lifecycle.

use std::sync::Arc;

use chrono::Utc;
use common::{AggregateId, UserId};
use domain::{
    Actor, Aggregate, Booking, BookingError, BookingEvent, BookingLifecycleManager, Clock,
    Currency, DomainError, Money, PaymentStatus, SplitPayout,
};
use event_store::EventStore;
use serde::Serialize;
use uuid::Uuid;

use crate::config::PaymentConfig;
use crate::error::{GatewayError, PaymentError};
use crate::gateway::{ChargeOutcome, IntentRequest, IntentStatus, PaymentGateway, RefundRequest, RefundStatus};
use crate::webhook::{CHARGE_REFUNDED, PAYMENT_FAILED, PAYMENT_SUCCEEDED, WebhookEvent};

/// What the client needs to finish paying.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentIntentHandle {
    pub booking_id: AggregateId,
    pub intent_id: String,
    pub client_secret: Option<String>,
    pub status: IntentStatus,
    pub split: Option<SplitPayout>,
}

/// Outcome of one webhook delivery.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum WebhookEffect {
    PaymentCompleted { booking_id: AggregateId },
    PaymentFailed { booking_id: AggregateId, reason: String },
    RefundSettled { booking_id: AggregateId, amount: Money },
    /// A second intent was charged after the payment was paid; the charge
    /// was sent back in full.
    DuplicateChargeRefunded { booking_id: AggregateId, intent_id: String },
    /// Already applied, or out of order and superseded.
    NoOp { booking_id: AggregateId },
    Ignored { event_type: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefundRetryReport {
    pub attempted: usize,
    pub settled: usize,
    /// Accepted by the provider, waiting for its webhook.
    pub awaiting_provider: usize,
    pub failed: usize,
}

/// Drives payment intents, refunds and webhook reconciliation for bookings.
///
/// No lock is held across a gateway call: local state is read, the gateway
/// is called, and the outcome is recorded through the lifecycle manager,
/// which re-reads the booking before appending.
pub struct PaymentOrchestrator<S: EventStore + Clone> {
    bookings: Arc<BookingLifecycleManager<S>>,
    gateway: Arc<dyn PaymentGateway>,
    config: PaymentConfig,
    clock: Clock,
}

impl<S: EventStore + Clone> PaymentOrchestrator<S> {
    pub fn new(
        bookings: Arc<BookingLifecycleManager<S>>,
        gateway: Arc<dyn PaymentGateway>,
        config: PaymentConfig,
    ) -> Self {
        Self {
            bookings,
            gateway,
            config,
            clock: Arc::new(Utc::now),
        }
    }

    /// Clock used for webhook timestamp checks.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn bookings(&self) -> &Arc<BookingLifecycleManager<S>> {
        &self.bookings
    }

    pub fn gateway(&self) -> &Arc<dyn PaymentGateway> {
        &self.gateway
    }

    /// Opens a payment intent for the booking's total.
    ///
    /// With a supplier payout account on file the intent is a split charge:
    /// the platform keeps the service fee, the rest goes to the supplier.
    #[tracing::instrument(skip(self))]
    pub async fn create_intent(&self, booking_id: AggregateId) -> Result<PaymentIntentHandle, PaymentError> {
        let booking = self.load(booking_id).await?;
        let payment = booking
            .payment()
            .ok_or_else(|| DomainError::not_found("Booking", booking_id))?;
        if booking.status().is_terminal() {
            return Err(DomainError::from(BookingError::InvalidTransition {
                status: booking.status(),
                action: "create a payment intent for",
            })
            .into());
        }
        if !matches!(payment.status(), PaymentStatus::Pending | PaymentStatus::Failed) {
            return Err(DomainError::from(BookingError::PaymentState {
                status: payment.status(),
                action: "create an intent for",
            })
            .into());
        }

        let idempotency_key = booking
            .next_intent_key()
            .ok_or_else(|| DomainError::not_found("Booking", booking_id))?;
        let split = self.split_for(&booking).await?;
        let description = match (booking.range(), booking.accommodation_id()) {
            (Some(range), Some(accommodation_id)) => format!(
                "{} nights at {accommodation_id} from {}",
                range.nights(),
                range.check_in()
            ),
            _ => format!("Booking {booking_id}"),
        };

        let request = IntentRequest {
            booking_id,
            amount: payment.amount(),
            method: payment.method(),
            description,
            idempotency_key: idempotency_key.clone(),
            split: split.clone(),
        };
        let intent = self
            .gateway
            .create_payment_intent(request)
            .await
            .map_err(|e| self.gateway_failure("create_intent", booking_id, e))?;

        self.bookings
            .attach_payment_intent(booking_id, intent.id.clone(), idempotency_key, split.clone())
            .await?;

        let split_label = if split.is_some() { "true" } else { "false" };
        metrics::counter!("payment_intents_created_total", "split" => split_label).increment(1);
        tracing::info!(%booking_id, intent_id = %intent.id, split = split.is_some(), "payment intent created");

        Ok(PaymentIntentHandle {
            booking_id,
            intent_id: intent.id,
            client_secret: intent.client_secret,
            status: intent.status,
            split,
        })
    }

    async fn split_for(&self, booking: &Booking) -> Result<Option<SplitPayout>, PaymentError> {
        let (Some(accommodation_id), Some(price)) = (booking.accommodation_id(), booking.price()) else {
            return Ok(None);
        };
        let listing = self
            .bookings
            .catalog()
            .accommodation(accommodation_id)
            .await
            .map_err(DomainError::from)?;
        let Some(destination_account) = listing.and_then(|l| l.payout_account) else {
            return Ok(None);
        };

        Ok(Some(SplitPayout {
            destination_account,
            application_fee: price.service_fee,
            supplier_amount: price.supplier_share().map_err(DomainError::from)?,
        }))
    }

    /// Confirms the intent with a payment method.
    ///
    /// A decline marks the payment failed and surfaces the provider's
    /// reason. A retryable failure changes nothing locally.
    #[tracing::instrument(skip(self, method_token))]
    pub async fn confirm(&self, intent_id: &str, method_token: &str) -> Result<Booking, PaymentError> {
        let booking_id = self.booking_id_for_intent(intent_id).await?;
        match self.gateway.confirm(intent_id, method_token).await {
            Ok(outcome) => self.apply_charge(booking_id, intent_id, outcome).await,
            Err(e) => Err(self.charge_failed(booking_id, intent_id, "confirm", e).await?),
        }
    }

    /// Captures an authorized intent.
    #[tracing::instrument(skip(self))]
    pub async fn capture(&self, intent_id: &str) -> Result<Booking, PaymentError> {
        let booking_id = self.booking_id_for_intent(intent_id).await?;
        match self.gateway.capture(intent_id).await {
            Ok(outcome) => self.apply_charge(booking_id, intent_id, outcome).await,
            Err(e) => Err(self.charge_failed(booking_id, intent_id, "capture", e).await?),
        }
    }

    async fn apply_charge(
        &self,
        booking_id: AggregateId,
        intent_id: &str,
        outcome: ChargeOutcome,
    ) -> Result<Booking, PaymentError> {
        let result = match outcome.status {
            IntentStatus::Succeeded => {
                let booking = self.load(booking_id).await?;
                if booking.is_duplicate_charge(intent_id) {
                    self.refund_duplicate_charge(&booking, booking_id, intent_id).await?;
                    return Ok(booking);
                }
                let transaction_id = outcome.transaction_id.unwrap_or_else(|| intent_id.to_string());
                self.bookings
                    .record_payment_succeeded(booking_id, intent_id, transaction_id, None)
                    .await?
            }
            IntentStatus::Processing | IntentStatus::RequiresCapture => {
                self.bookings.record_payment_processing(booking_id).await?
            }
            IntentStatus::RequiresPaymentMethod if outcome.failure_reason.is_some() => {
                let reason = outcome.failure_reason.unwrap_or_default();
                self.bookings
                    .record_payment_failed(booking_id, intent_id, reason, None)
                    .await?
            }
            status => {
                tracing::debug!(%booking_id, ?status, "charge needs more from the payer");
                return self.load(booking_id).await;
            }
        };

        self.refund_if_requested(result.aggregate).await
    }

    /// Records a terminal failure and builds the error to surface.
    async fn charge_failed(
        &self,
        booking_id: AggregateId,
        intent_id: &str,
        operation: &'static str,
        error: GatewayError,
    ) -> Result<PaymentError, PaymentError> {
        if !error.is_retryable() {
            let reason = error.provider_message().to_string();
            self.bookings
                .record_payment_failed(booking_id, intent_id, reason, None)
                .await?;
        }
        Ok(self.gateway_failure(operation, booking_id, error))
    }

    fn gateway_failure(
        &self,
        operation: &'static str,
        booking_id: AggregateId,
        error: GatewayError,
    ) -> PaymentError {
        let reference = Uuid::new_v4().simple().to_string();
        let retryable = if error.is_retryable() { "true" } else { "false" };
        metrics::counter!(
            "payment_gateway_errors_total",
            "operation" => operation,
            "retryable" => retryable
        )
        .increment(1);
        tracing::warn!(
            %booking_id,
            operation,
            %reference,
            provider = self.gateway.provider(),
            error = %error,
            "payment gateway call failed"
        );
        PaymentError::Gateway {
            source: error,
            reference,
        }
    }

    /// Records a refund and sends it to the gateway. Without an amount,
    /// everything not yet refunded is returned.
    #[tracing::instrument(skip(self))]
    pub async fn refund(
        &self,
        intent_id: &str,
        amount: Option<Money>,
        reason: &str,
    ) -> Result<Booking, PaymentError> {
        let booking_id = self.booking_id_for_intent(intent_id).await?;
        self.bookings.request_refund(booking_id, amount, reason).await?;
        self.dispatch_refund(booking_id).await
    }

    /// Sends the booking's pending refund with its stored amount and key.
    ///
    /// A failure is recorded on the booking, which stays REFUND_REQUESTED,
    /// and returned as [`PaymentError::Reconciliation`].
    ///
    /// When the settlement releases a queued refund, that one is sent next.
    #[tracing::instrument(skip(self))]
    pub async fn dispatch_refund(&self, booking_id: AggregateId) -> Result<Booking, PaymentError> {
        let mut booking = self.load(booking_id).await?;
        loop {
            match self.send_pending_refund(booking_id, booking).await? {
                (updated, true) => booking = updated,
                (updated, false) => return Ok(updated),
            }
        }
    }

    /// Sends one pending refund. The flag is set when it settled on the spot
    /// and another refund became pending.
    async fn send_pending_refund(
        &self,
        booking_id: AggregateId,
        booking: Booking,
    ) -> Result<(Booking, bool), PaymentError> {
        let Some(payment) = booking.payment() else {
            return Ok((booking, false));
        };
        let Some(pending) = payment.pending_refund() else {
            return Ok((booking, false));
        };
        let Some(intent_id) = payment.intent_id() else {
            return self
                .refund_failed(booking_id, "payment has no gateway intent".to_string(), false)
                .await
                .map(|b| (b, false));
        };

        let request = RefundRequest {
            intent_id: intent_id.to_string(),
            amount: pending.amount,
            reason: pending.reason.clone(),
            idempotency_key: pending.idempotency_key.clone(),
        };
        let attempt = pending.attempts + 1;
        tracing::debug!(%booking_id, attempt, amount = %request.amount, "dispatching refund");

        match self.gateway.refund(request).await {
            Ok(outcome) => match outcome.status {
                RefundStatus::Succeeded => {
                    let settled = self
                        .bookings
                        .record_refund_settled(booking_id, outcome.refund_id, None)
                        .await?
                        .aggregate;
                    let next = settled
                        .payment()
                        .is_some_and(|p| p.pending_refund().is_some());
                    Ok((settled, next))
                }
                RefundStatus::Pending => {
                    tracing::info!(%booking_id, refund_id = %outcome.refund_id, "refund accepted, awaiting provider");
                    Ok((booking, false))
                }
                RefundStatus::Failed => {
                    let reason = format!("refund {} failed at the provider", outcome.refund_id);
                    self.refund_failed(booking_id, reason, false)
                        .await
                        .map(|b| (b, false))
                }
            },
            Err(e) => self
                .refund_failed(booking_id, e.to_string(), e.is_retryable())
                .await
                .map(|b| (b, false)),
        }
    }

    async fn refund_failed(
        &self,
        booking_id: AggregateId,
        reason: String,
        retryable: bool,
    ) -> Result<Booking, PaymentError> {
        self.bookings
            .record_refund_failure(booking_id, reason.clone(), retryable)
            .await?;
        metrics::counter!("reconciliation_errors_total").increment(1);
        tracing::error!(%booking_id, retryable, error = %reason, "refund needs reconciliation");
        Err(PaymentError::Reconciliation { booking_id, reason })
    }

    /// Dispatches a refund the last transition requested. A failed dispatch
    /// is already recorded and logged, so the booking is returned as is.
    async fn refund_if_requested(&self, booking: Booking) -> Result<Booking, PaymentError> {
        let has_pending = booking
            .payment()
            .is_some_and(|p| p.pending_refund().is_some());
        let Some(booking_id) = booking.id().filter(|_| has_pending) else {
            return Ok(booking);
        };

        match self.dispatch_refund(booking_id).await {
            Ok(updated) => Ok(updated),
            Err(PaymentError::Reconciliation { .. }) => Ok(self.load(booking_id).await?),
            Err(e) => Err(e),
        }
    }

    /// Cancels the booking and sends whatever refund the policy grants.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_booking(
        &self,
        booking_id: AggregateId,
        actor: Actor,
        reason: Option<String>,
    ) -> Result<Booking, PaymentError> {
        let booking = self.bookings.cancel(booking_id, actor, reason).await?;
        self.refund_if_requested(booking).await
    }

    /// Rejects the booking and refunds anything paid in full.
    #[tracing::instrument(skip(self))]
    pub async fn reject_booking(
        &self,
        booking_id: AggregateId,
        supplier_id: UserId,
        reason: &str,
    ) -> Result<Booking, PaymentError> {
        let booking = self.bookings.reject(booking_id, supplier_id, reason).await?;
        self.refund_if_requested(booking).await
    }

    /// Re-sends every refund still waiting on the gateway.
    #[tracing::instrument(skip(self))]
    pub async fn retry_pending_refunds(&self) -> Result<RefundRetryReport, PaymentError> {
        let mut report = RefundRetryReport::default();
        for booking in self.bookings.bookings_with_pending_refunds().await? {
            let Some(booking_id) = booking.id() else {
                continue;
            };
            report.attempted += 1;
            match self.dispatch_refund(booking_id).await {
                Ok(updated) if updated.payment().is_some_and(|p| p.pending_refund().is_none()) => {
                    report.settled += 1;
                }
                Ok(_) => report.awaiting_provider += 1,
                Err(PaymentError::Reconciliation { .. }) => report.failed += 1,
                Err(e) => {
                    tracing::warn!(%booking_id, error = %e, "refund retry skipped");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            attempted = report.attempted,
            settled = report.settled,
            failed = report.failed,
            "pending refunds retried"
        );
        Ok(report)
    }

    /// Applies a signed provider webhook.
    ///
    /// The signature is checked before anything is parsed. Each event id is
    /// applied at most once per booking; replays and superseded events come
    /// back as [`WebhookEffect::NoOp`].
    #[tracing::instrument(skip(self, payload, signature))]
    pub async fn reconcile_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<WebhookEffect, PaymentError> {
        if let Err(e) = self.gateway.verify_webhook_signature(
            payload,
            signature,
            &self.config.webhook_secret,
            self.config.webhook_tolerance,
            (self.clock)(),
        ) {
            metrics::counter!("webhooks_rejected_total").increment(1);
            tracing::warn!(error = %e, "webhook rejected");
            return Err(e);
        }

        let event = self.gateway.parse_webhook_event(payload)?;
        metrics::counter!("webhooks_received_total", "type" => event.event_type.clone()).increment(1);
        tracing::debug!(event_id = %event.id, event_type = %event.event_type, "webhook received");

        if !matches!(
            event.event_type.as_str(),
            PAYMENT_SUCCEEDED | PAYMENT_FAILED | CHARGE_REFUNDED
        ) {
            return Ok(ignored(&event, "unhandled type"));
        }
        let Some(booking) = self.booking_for_event(&event).await? else {
            return Ok(ignored(&event, "unknown intent"));
        };
        let Some(booking_id) = booking.id() else {
            return Ok(ignored(&event, "unknown intent"));
        };

        let event_id = Some(event.id.clone());
        let result = match event.event_type.as_str() {
            PAYMENT_SUCCEEDED => {
                let intent_id = event_intent(&event)?;
                if booking.is_duplicate_charge(intent_id) {
                    return self.refund_duplicate_charge(&booking, booking_id, intent_id).await;
                }
                let transaction_id = event.transaction_id().unwrap_or(intent_id).to_string();
                self.bookings
                    .record_payment_succeeded(booking_id, intent_id, transaction_id, event_id)
                    .await?
            }
            PAYMENT_FAILED => {
                let intent_id = event_intent(&event)?;
                let reason = event.failure_message().unwrap_or("payment failed").to_string();
                self.bookings
                    .record_payment_failed(booking_id, intent_id, reason, event_id)
                    .await?
            }
            _ => {
                let cumulative = refunded_total(&event, &booking)?;
                let refund_id = event.refund_id().unwrap_or(event.id.as_str()).to_string();
                self.bookings
                    .record_gateway_refund(booking_id, refund_id, cumulative, event_id)
                    .await?
            }
        };

        if result.is_noop() {
            tracing::debug!(%booking_id, event_id = %event.id, "webhook changed nothing");
            return Ok(WebhookEffect::NoOp { booking_id });
        }

        let effect = result
            .events
            .iter()
            .find_map(|e| match e {
                BookingEvent::PaymentSucceeded(_) => Some(WebhookEffect::PaymentCompleted { booking_id }),
                BookingEvent::PaymentFailed(data) => Some(WebhookEffect::PaymentFailed {
                    booking_id,
                    reason: data.reason.clone(),
                }),
                BookingEvent::RefundSettled(data) => Some(WebhookEffect::RefundSettled {
                    booking_id,
                    amount: data.amount,
                }),
                _ => None,
            })
            .unwrap_or(WebhookEffect::NoOp { booking_id });
        tracing::info!(%booking_id, event_id = %event.id, ?effect, "webhook applied");

        // Money that arrived for an ended booking goes straight back.
        self.refund_if_requested(result.aggregate).await?;
        Ok(effect)
    }

    /// Sends back a charge on an intent other than the one that paid.
    ///
    /// The idempotency key is derived from the intent, so redelivered
    /// webhooks reach the provider as the same refund.
    async fn refund_duplicate_charge(
        &self,
        booking: &Booking,
        booking_id: AggregateId,
        intent_id: &str,
    ) -> Result<WebhookEffect, PaymentError> {
        let Some(amount) = booking.payment().map(|p| p.amount()) else {
            return Ok(WebhookEffect::NoOp { booking_id });
        };
        let request = RefundRequest {
            intent_id: intent_id.to_string(),
            amount,
            reason: "duplicate charge".to_string(),
            idempotency_key: format!("refund-{booking_id}-{intent_id}"),
        };
        metrics::counter!("payment_duplicate_charges_total").increment(1);
        tracing::warn!(%booking_id, intent_id, %amount, "second charge on a paid booking, refunding");

        match self.gateway.refund(request).await {
            Ok(outcome) if outcome.status != RefundStatus::Failed => {
                tracing::info!(%booking_id, refund_id = %outcome.refund_id, "duplicate charge refunded");
                Ok(WebhookEffect::DuplicateChargeRefunded {
                    booking_id,
                    intent_id: intent_id.to_string(),
                })
            }
            Ok(outcome) => Err(duplicate_refund_failed(
                booking_id,
                format!("refund {} of duplicate charge on {intent_id} failed", outcome.refund_id),
            )),
            Err(e) => Err(duplicate_refund_failed(
                booking_id,
                format!("duplicate charge on {intent_id}: {e}"),
            )),
        }
    }

    async fn booking_for_event(&self, event: &WebhookEvent) -> Result<Option<Booking>, PaymentError> {
        if let Some(booking_id) = event.booking_id() {
            if let Some(booking) = self.bookings.get_booking(booking_id).await? {
                return Ok(Some(booking));
            }
        }
        match event.intent_id() {
            Some(intent_id) => Ok(self.bookings.find_by_payment_intent(intent_id).await?),
            None => Ok(None),
        }
    }

    async fn booking_id_for_intent(&self, intent_id: &str) -> Result<AggregateId, PaymentError> {
        self.bookings
            .find_by_payment_intent(intent_id)
            .await?
            .and_then(|b| b.id())
            .ok_or_else(|| PaymentError::IntentNotFound(intent_id.to_string()))
    }

    async fn load(&self, booking_id: AggregateId) -> Result<Booking, PaymentError> {
        Ok(self
            .bookings
            .get_booking(booking_id)
            .await?
            .ok_or_else(|| DomainError::not_found("Booking", booking_id))?)
    }
}

fn ignored(event: &WebhookEvent, reason: &'static str) -> WebhookEffect {
    metrics::counter!("webhooks_ignored_total", "reason" => reason).increment(1);
    tracing::warn!(event_id = %event.id, event_type = %event.event_type, reason, "webhook ignored");
    WebhookEffect::Ignored {
        event_type: event.event_type.clone(),
    }
}

fn event_intent(event: &WebhookEvent) -> Result<&str, PaymentError> {
    event
        .intent_id()
        .ok_or_else(|| PaymentError::MalformedWebhook("intent without id".to_string()))
}

fn duplicate_refund_failed(booking_id: AggregateId, reason: String) -> PaymentError {
    metrics::counter!("reconciliation_errors_total").increment(1);
    tracing::error!(%booking_id, error = %reason, "duplicate charge needs reconciliation");
    PaymentError::Reconciliation { booking_id, reason }
}

/// The charge's cumulative refunded total in the booking's currency.
fn refunded_total(event: &WebhookEvent, booking: &Booking) -> Result<Money, PaymentError> {
    let units = event.amount_refunded().ok_or_else(|| {
        PaymentError::MalformedWebhook("charge.refunded without amount_refunded".to_string())
    })?;
    let currency = booking
        .payment()
        .map(|p| p.amount().currency())
        .ok_or_else(|| PaymentError::MalformedWebhook("booking has no payment".to_string()))?;
    if let Some(code) = event.currency() {
        let reported = Currency::new(code).map_err(|e| PaymentError::MalformedWebhook(e.to_string()))?;
        if reported != currency {
            return Err(PaymentError::MalformedWebhook(format!(
                "refund in {reported} for a {currency} payment"
            )));
        }
    }
    Ok(Money::from_minor_units(units, currency))
}
