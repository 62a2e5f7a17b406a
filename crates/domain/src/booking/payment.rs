use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::money::{Money, MoneyError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Card,
    Paypal,
    BankTransfer,
    Crypto,
    ApplePay,
    GooglePay,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "CARD",
            PaymentMethod::Paypal => "PAYPAL",
            PaymentMethod::BankTransfer => "BANK_TRANSFER",
            PaymentMethod::Crypto => "CRYPTO",
            PaymentMethod::ApplePay => "APPLE_PAY",
            PaymentMethod::GooglePay => "GOOGLE_PAY",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// No intent yet, or an intent that was never confirmed.
    #[default]
    Pending,
    /// Accepted by the gateway, not yet settled.
    Processing,
    Completed,
    /// Declined; a new intent may be created.
    Failed,
    /// A refund was recorded locally and awaits the gateway.
    RefundRequested,
    PartiallyRefunded,
    Refunded,
    /// The booking ended before any money moved.
    Voided,
}

impl PaymentStatus {
    /// A charge can still be attempted or may still settle.
    pub fn awaiting_funds(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Pending | PaymentStatus::Processing | PaymentStatus::Failed
        )
    }

    /// Money can be returned from this state.
    pub fn refundable(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Completed | PaymentStatus::PartiallyRefunded
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Processing => "PROCESSING",
            PaymentStatus::Completed => "COMPLETED",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::RefundRequested => "REFUND_REQUESTED",
            PaymentStatus::PartiallyRefunded => "PARTIALLY_REFUNDED",
            PaymentStatus::Refunded => "REFUNDED",
            PaymentStatus::Voided => "VOIDED",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a split charge is divided at settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitPayout {
    /// Supplier's connected payout account.
    pub destination_account: String,
    /// Kept by the platform.
    pub application_fee: Money,
    /// Transferred to the supplier.
    pub supplier_amount: Money,
}

/// A refund recorded locally but not yet confirmed by the gateway.
///
/// Amount and idempotency key are fixed when the refund is requested and
/// reused verbatim on every retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRefund {
    pub amount: Money,
    pub reason: String,
    pub idempotency_key: String,
    pub requested_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// A refund decided while another one was still in flight. It is
/// requested as soon as that one settles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedRefund {
    pub amount: Money,
    pub reason: String,
    pub queued_at: DateTime<Utc>,
}

/// The payment owned by a booking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub(super) id: Uuid,
    pub(super) amount: Money,
    pub(super) method: PaymentMethod,
    pub(super) provider: String,
    pub(super) intent_id: Option<String>,
    pub(super) transaction_id: Option<String>,
    pub(super) status: PaymentStatus,
    pub(super) failure_reason: Option<String>,
    pub(super) refunded_amount: Money,
    pub(super) refund_reason: Option<String>,
    pub(super) pending_refund: Option<PendingRefund>,
    pub(super) queued_refund: Option<QueuedRefund>,
    pub(super) split: Option<SplitPayout>,
    pub(super) intent_attempts: u32,
    pub(super) refund_requests: u32,
    pub(super) processed_webhooks: BTreeSet<String>,
    pub(super) created_at: DateTime<Utc>,
    pub(super) paid_at: Option<DateTime<Utc>>,
    pub(super) refunded_at: Option<DateTime<Utc>>,
}

impl Payment {
    pub(super) fn new(
        id: Uuid,
        amount: Money,
        method: PaymentMethod,
        provider: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            amount,
            method,
            provider,
            intent_id: None,
            transaction_id: None,
            status: PaymentStatus::Pending,
            failure_reason: None,
            refunded_amount: Money::zero(amount.currency()),
            refund_reason: None,
            pending_refund: None,
            queued_refund: None,
            split: None,
            intent_attempts: 0,
            refund_requests: 0,
            processed_webhooks: BTreeSet::new(),
            created_at,
            paid_at: None,
            refunded_at: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Charged amount. Fixed at creation.
    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn method(&self) -> PaymentMethod {
        self.method
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn intent_id(&self) -> Option<&str> {
        self.intent_id.as_deref()
    }

    pub fn transaction_id(&self) -> Option<&str> {
        self.transaction_id.as_deref()
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn refunded_amount(&self) -> Money {
        self.refunded_amount
    }

    pub fn refund_reason(&self) -> Option<&str> {
        self.refund_reason.as_deref()
    }

    pub fn pending_refund(&self) -> Option<&PendingRefund> {
        self.pending_refund.as_ref()
    }

    pub fn queued_refund(&self) -> Option<&QueuedRefund> {
        self.queued_refund.as_ref()
    }

    pub fn split(&self) -> Option<&SplitPayout> {
        self.split.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn paid_at(&self) -> Option<DateTime<Utc>> {
        self.paid_at
    }

    pub fn refunded_at(&self) -> Option<DateTime<Utc>> {
        self.refunded_at
    }

    /// Money has been received at some point.
    pub fn is_paid(&self) -> bool {
        self.paid_at.is_some()
    }

    /// Amount that can still be returned to the traveler.
    pub fn remaining(&self) -> Result<Money, MoneyError> {
        self.amount.try_sub(&self.refunded_amount)
    }

    pub fn has_processed(&self, webhook_event_id: &str) -> bool {
        self.processed_webhooks.contains(webhook_event_id)
    }

    pub(super) fn remember_webhook(&mut self, webhook_event_id: Option<String>) {
        if let Some(id) = webhook_event_id {
            self.processed_webhooks.insert(id);
        }
    }

    /// Status once settled refunds are accounted for.
    pub(super) fn settled_status(&self) -> PaymentStatus {
        if self.pending_refund.is_some() {
            PaymentStatus::RefundRequested
        } else if self.refunded_amount.amount() >= self.amount.amount() {
            PaymentStatus::Refunded
        } else if self.refunded_amount.is_positive() {
            PaymentStatus::PartiallyRefunded
        } else {
            PaymentStatus::Completed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Currency;
    use rust_decimal_macros::dec;

    fn payment() -> Payment {
        Payment::new(
            Uuid::new_v4(),
            Money::new(dec!(386.40), Currency::USD),
            PaymentMethod::Card,
            "STRIPE".to_string(),
            Utc::now(),
        )
    }

    #[test]
    fn starts_pending_with_nothing_refunded() {
        let payment = payment();
        assert_eq!(payment.status(), PaymentStatus::Pending);
        assert!(payment.refunded_amount().is_zero());
        assert_eq!(payment.remaining().unwrap(), payment.amount());
        assert!(!payment.is_paid());
    }

    #[test]
    fn settled_status_follows_refunded_amount() {
        let mut payment = payment();
        assert_eq!(payment.settled_status(), PaymentStatus::Completed);

        payment.refunded_amount = Money::new(dec!(50), Currency::USD);
        assert_eq!(payment.settled_status(), PaymentStatus::PartiallyRefunded);

        payment.refunded_amount = payment.amount;
        assert_eq!(payment.settled_status(), PaymentStatus::Refunded);
    }

    #[test]
    fn statuses_use_wire_names() {
        assert_eq!(
            serde_json::to_string(&PaymentStatus::RefundRequested).unwrap(),
            "\"REFUND_REQUESTED\""
        );
        assert_eq!(PaymentMethod::ApplePay.as_str(), "APPLE_PAY");
    }
}
