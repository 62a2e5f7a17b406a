//! Provider webhook payloads.

use common::AggregateId;
use serde::Deserialize;
use serde_json::Value;

use crate::error::PaymentError;

pub const PAYMENT_SUCCEEDED: &str = "payment_intent.succeeded";
pub const PAYMENT_FAILED: &str = "payment_intent.payment_failed";
pub const CHARGE_REFUNDED: &str = "charge.refunded";

#[derive(Debug, Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: RawData,
}

#[derive(Debug, Deserialize)]
struct RawData {
    object: Value,
}

/// A webhook event with accessors for the fields reconciliation reads.
///
/// The object is kept as raw JSON; providers add fields freely and only a
/// handful matter here.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEvent {
    pub id: String,
    pub event_type: String,
    pub object: Value,
}

impl WebhookEvent {
    pub fn parse(payload: &[u8]) -> Result<Self, PaymentError> {
        let raw: RawEvent = serde_json::from_slice(payload)
            .map_err(|e| PaymentError::MalformedWebhook(e.to_string()))?;
        if raw.id.is_empty() {
            return Err(PaymentError::MalformedWebhook("event id is empty".to_string()));
        }
        Ok(Self {
            id: raw.id,
            event_type: raw.event_type,
            object: raw.data.object,
        })
    }

    fn str_field(&self, pointer: &str) -> Option<&str> {
        self.object.pointer(pointer).and_then(Value::as_str)
    }

    /// `metadata.booking_id`, set when the intent was created.
    pub fn booking_id(&self) -> Option<AggregateId> {
        self.str_field("/metadata/booking_id")?.parse().ok()
    }

    pub fn intent_id(&self) -> Option<&str> {
        if self.event_type.starts_with("payment_intent.") {
            self.str_field("/id")
        } else {
            self.str_field("/payment_intent")
        }
    }

    /// The charge behind a successful intent, else the intent itself.
    pub fn transaction_id(&self) -> Option<&str> {
        self.str_field("/latest_charge").or_else(|| self.str_field("/id"))
    }

    pub fn failure_message(&self) -> Option<&str> {
        self.str_field("/last_payment_error/message")
    }

    /// Cumulative refunded total on a charge, in minor units.
    pub fn amount_refunded(&self) -> Option<i64> {
        self.object.get("amount_refunded").and_then(Value::as_i64)
    }

    pub fn currency(&self) -> Option<&str> {
        self.str_field("/currency")
    }

    /// Most recent refund on a charge, else the charge id.
    pub fn refund_id(&self) -> Option<&str> {
        self.str_field("/refunds/data/0/id")
            .or_else(|| self.str_field("/id"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn reads_a_succeeded_intent() {
        let booking_id = AggregateId::new();
        let event = WebhookEvent::parse(&payload(json!({
            "id": "evt_1",
            "type": PAYMENT_SUCCEEDED,
            "data": {"object": {
                "id": "pi_1",
                "latest_charge": "ch_1",
                "metadata": {"booking_id": booking_id.to_string()}
            }}
        })))
        .unwrap();

        assert_eq!(event.id, "evt_1");
        assert_eq!(event.intent_id(), Some("pi_1"));
        assert_eq!(event.transaction_id(), Some("ch_1"));
        assert_eq!(event.booking_id(), Some(booking_id));
    }

    #[test]
    fn reads_a_refunded_charge() {
        let event = WebhookEvent::parse(&payload(json!({
            "id": "evt_2",
            "type": CHARGE_REFUNDED,
            "data": {"object": {
                "id": "ch_1",
                "payment_intent": "pi_1",
                "amount_refunded": 5000,
                "currency": "usd",
                "refunds": {"data": [{"id": "re_9"}]}
            }}
        })))
        .unwrap();

        assert_eq!(event.intent_id(), Some("pi_1"));
        assert_eq!(event.amount_refunded(), Some(5000));
        assert_eq!(event.refund_id(), Some("re_9"));
        assert_eq!(event.currency(), Some("usd"));
        assert_eq!(event.booking_id(), None);
    }

    #[test]
    fn failure_message() {
        let event = WebhookEvent::parse(&payload(json!({
            "id": "evt_3",
            "type": PAYMENT_FAILED,
            "data": {"object": {
                "id": "pi_1",
                "last_payment_error": {"message": "Your card has insufficient funds."}
            }}
        })))
        .unwrap();
        assert_eq!(event.failure_message(), Some("Your card has insufficient funds."));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            WebhookEvent::parse(b"not json"),
            Err(PaymentError::MalformedWebhook(_))
        ));
        assert!(matches!(
            WebhookEvent::parse(&payload(json!({"id": "evt_4", "type": "x"}))),
            Err(PaymentError::MalformedWebhook(_))
        ));
    }
}
