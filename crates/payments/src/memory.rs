//! In-memory payment gateway for tests and local runs.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use domain::Money;

use crate::error::GatewayError;
use crate::gateway::{
    ChargeOutcome, IntentRequest, IntentStatus, PaymentGateway, PaymentIntent, RefundOutcome,
    RefundRequest, RefundStatus,
};

/// Method token the gateway declines.
pub const DECLINED_TOKEN: &str = "pm_card_declined";
/// Method token that authorizes without capturing.
pub const MANUAL_CAPTURE_TOKEN: &str = "pm_requires_capture";
/// Method token that leaves the charge processing.
pub const PROCESSING_TOKEN: &str = "pm_processing";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOp {
    CreateIntent,
    Confirm,
    Capture,
    Refund,
    Status,
}

#[derive(Debug, Clone)]
struct StoredIntent {
    request: IntentRequest,
    status: IntentStatus,
    transaction_id: Option<String>,
    refunded: Money,
}

#[derive(Debug, Default)]
struct GatewayState {
    intents: HashMap<String, StoredIntent>,
    intents_by_key: HashMap<String, String>,
    created: Vec<IntentRequest>,
    refunds_by_key: HashMap<String, RefundOutcome>,
    refund_calls: Vec<RefundRequest>,
    failures: HashMap<GatewayOp, VecDeque<GatewayError>>,
    refund_status: Option<RefundStatus>,
    next_id: u32,
}

impl GatewayState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}_{:06}", self.next_id)
    }

    fn injected(&mut self, op: GatewayOp) -> Result<(), GatewayError> {
        match self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn intent_mut(&mut self, intent_id: &str) -> Result<&mut StoredIntent, GatewayError> {
        self.intents.get_mut(intent_id).ok_or_else(|| {
            GatewayError::terminal("resource_missing", format!("No such payment_intent: {intent_id}"))
        })
    }
}

/// Keeps intents and refunds in memory and behaves like a well-mannered
/// provider: idempotency keys are honored and over-refunds are refused.
#[derive(Debug, Clone, Default)]
pub struct InMemoryGateway {
    state: Arc<Mutex<GatewayState>>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, GatewayState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queues a failure for the next call of `op`.
    pub fn fail_next(&self, op: GatewayOp, error: GatewayError) {
        self.state().failures.entry(op).or_default().push_back(error);
    }

    /// Status reported for new refunds. Defaults to succeeded.
    pub fn set_refund_status(&self, status: RefundStatus) {
        self.state().refund_status = Some(status);
    }

    /// Intent requests in the order they reached the gateway.
    pub fn created_intents(&self) -> Vec<IntentRequest> {
        self.state().created.clone()
    }

    /// Every refund call, including replays.
    pub fn refund_calls(&self) -> Vec<RefundRequest> {
        self.state().refund_calls.clone()
    }

    /// Distinct refunds actually executed.
    pub fn refund_count(&self) -> usize {
        self.state().refunds_by_key.len()
    }

    pub fn refunded(&self, intent_id: &str) -> Option<Money> {
        self.state().intents.get(intent_id).map(|i| i.refunded)
    }
}

#[async_trait]
impl PaymentGateway for InMemoryGateway {
    fn provider(&self) -> &'static str {
        "IN_MEMORY"
    }

    async fn create_payment_intent(
        &self,
        request: IntentRequest,
    ) -> Result<PaymentIntent, GatewayError> {
        let mut state = self.state();
        state.injected(GatewayOp::CreateIntent)?;

        if let Some(existing) = state.intents_by_key.get(&request.idempotency_key).cloned() {
            let status = state.intent_mut(&existing)?.status.clone();
            return Ok(PaymentIntent {
                client_secret: Some(format!("{existing}_secret")),
                id: existing,
                status,
            });
        }

        let id = state.next_id("pi");
        let refunded = Money::zero(request.amount.currency());
        state.created.push(request.clone());
        state
            .intents_by_key
            .insert(request.idempotency_key.clone(), id.clone());
        state.intents.insert(
            id.clone(),
            StoredIntent {
                request,
                status: IntentStatus::RequiresConfirmation,
                transaction_id: None,
                refunded,
            },
        );

        Ok(PaymentIntent {
            client_secret: Some(format!("{id}_secret")),
            id,
            status: IntentStatus::RequiresConfirmation,
        })
    }

    async fn confirm(
        &self,
        intent_id: &str,
        method_token: &str,
    ) -> Result<ChargeOutcome, GatewayError> {
        let mut state = self.state();
        state.injected(GatewayOp::Confirm)?;
        let charge_id = state.next_id("ch");
        let intent = state.intent_mut(intent_id)?;

        if intent.status == IntentStatus::Succeeded {
            return Ok(ChargeOutcome {
                status: IntentStatus::Succeeded,
                transaction_id: intent.transaction_id.clone(),
                failure_reason: None,
            });
        }

        match method_token {
            DECLINED_TOKEN => {
                intent.status = IntentStatus::RequiresPaymentMethod;
                Err(GatewayError::terminal("card_declined", "Your card was declined."))
            }
            MANUAL_CAPTURE_TOKEN => {
                intent.status = IntentStatus::RequiresCapture;
                Ok(ChargeOutcome {
                    status: IntentStatus::RequiresCapture,
                    transaction_id: None,
                    failure_reason: None,
                })
            }
            PROCESSING_TOKEN => {
                intent.status = IntentStatus::Processing;
                Ok(ChargeOutcome {
                    status: IntentStatus::Processing,
                    transaction_id: None,
                    failure_reason: None,
                })
            }
            _ => {
                intent.status = IntentStatus::Succeeded;
                intent.transaction_id = Some(charge_id.clone());
                Ok(ChargeOutcome {
                    status: IntentStatus::Succeeded,
                    transaction_id: Some(charge_id),
                    failure_reason: None,
                })
            }
        }
    }

    async fn capture(&self, intent_id: &str) -> Result<ChargeOutcome, GatewayError> {
        let mut state = self.state();
        state.injected(GatewayOp::Capture)?;
        let charge_id = state.next_id("ch");
        let intent = state.intent_mut(intent_id)?;

        match intent.status {
            IntentStatus::RequiresCapture => {
                intent.status = IntentStatus::Succeeded;
                intent.transaction_id = Some(charge_id);
            }
            IntentStatus::Succeeded => {}
            ref other => {
                return Err(GatewayError::terminal(
                    "payment_intent_unexpected_state",
                    format!("Cannot capture a payment intent in status {other:?}"),
                ));
            }
        }

        Ok(ChargeOutcome {
            status: IntentStatus::Succeeded,
            transaction_id: intent.transaction_id.clone(),
            failure_reason: None,
        })
    }

    async fn refund(&self, request: RefundRequest) -> Result<RefundOutcome, GatewayError> {
        let mut state = self.state();
        state.refund_calls.push(request.clone());
        state.injected(GatewayOp::Refund)?;

        if let Some(done) = state.refunds_by_key.get(&request.idempotency_key) {
            return Ok(done.clone());
        }

        let refund_id = state.next_id("re");
        let status = state.refund_status.unwrap_or(RefundStatus::Succeeded);
        let intent = state.intent_mut(&request.intent_id)?;
        if intent.status != IntentStatus::Succeeded {
            return Err(GatewayError::terminal(
                "charge_not_captured",
                "This payment has not been captured",
            ));
        }
        let refunded = intent
            .refunded
            .try_add(&request.amount)
            .map_err(|e| GatewayError::terminal("invalid_currency", e.to_string()))?;
        if refunded.amount() > intent.request.amount.amount() {
            return Err(GatewayError::terminal(
                "charge_already_refunded",
                format!("Refund of {} exceeds the remaining charge", request.amount),
            ));
        }
        intent.refunded = refunded;

        let outcome = RefundOutcome {
            refund_id,
            amount: request.amount,
            status,
        };
        state
            .refunds_by_key
            .insert(request.idempotency_key, outcome.clone());
        Ok(outcome)
    }

    async fn payment_status(&self, intent_id: &str) -> Result<IntentStatus, GatewayError> {
        let mut state = self.state();
        state.injected(GatewayOp::Status)?;
        Ok(state.intent_mut(intent_id)?.status.clone())
    }
}
