//! Stripe adapter over the REST API.
//!
//! Requests are form encoded and authenticated with the secret key as the
//! basic-auth user. Every POST carries an `Idempotency-Key`.

use async_trait::async_trait;
use domain::{Currency, Money, PaymentMethod};
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;

use crate::error::GatewayError;
use crate::gateway::{
    ChargeOutcome, IntentRequest, IntentStatus, PaymentGateway, PaymentIntent, RefundOutcome,
    RefundRequest, RefundStatus,
};

pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";

type Form = Vec<(String, String)>;

pub struct StripeGateway {
    client: Client,
    api_base: String,
    secret_key: String,
}

impl StripeGateway {
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self::with_api_base(secret_key, DEFAULT_API_BASE)
    }

    /// Points the adapter at another host, e.g. a local mock server.
    pub fn with_api_base(secret_key: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        }
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        form: Option<&Form>,
        idempotency_key: Option<&str>,
    ) -> Result<Value, GatewayError> {
        let url = format!("{}{}", self.api_base, path);
        let mut request = self
            .client
            .request(method, &url)
            .basic_auth(&self.secret_key, None::<&str>);
        if let Some(form) = form {
            request = request.form(form);
        }
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;

        if status.is_success() {
            serde_json::from_str(&text).map_err(|e| GatewayError::InvalidResponse(e.to_string()))
        } else {
            let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
            tracing::warn!(path, status = status.as_u16(), "stripe request failed");
            Err(classify(status, &body))
        }
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn provider(&self) -> &'static str {
        "STRIPE"
    }

    #[tracing::instrument(skip(self, request), fields(booking_id = %request.booking_id))]
    async fn create_payment_intent(
        &self,
        request: IntentRequest,
    ) -> Result<PaymentIntent, GatewayError> {
        let form = intent_form(&request)?;
        let body = self
            .call(
                Method::POST,
                "/v1/payment_intents",
                Some(&form),
                Some(&request.idempotency_key),
            )
            .await?;
        parse_intent(&body)
    }

    #[tracing::instrument(skip(self, method_token))]
    async fn confirm(
        &self,
        intent_id: &str,
        method_token: &str,
    ) -> Result<ChargeOutcome, GatewayError> {
        let form = vec![("payment_method".to_string(), method_token.to_string())];
        let key = format!("confirm-{intent_id}-{method_token}");
        let body = self
            .call(
                Method::POST,
                &format!("/v1/payment_intents/{intent_id}/confirm"),
                Some(&form),
                Some(&key),
            )
            .await?;
        parse_charge(&body)
    }

    #[tracing::instrument(skip(self))]
    async fn capture(&self, intent_id: &str) -> Result<ChargeOutcome, GatewayError> {
        let key = format!("capture-{intent_id}");
        let body = self
            .call(
                Method::POST,
                &format!("/v1/payment_intents/{intent_id}/capture"),
                Some(&Form::new()),
                Some(&key),
            )
            .await?;
        parse_charge(&body)
    }

    #[tracing::instrument(skip(self, request), fields(intent_id = %request.intent_id))]
    async fn refund(&self, request: RefundRequest) -> Result<RefundOutcome, GatewayError> {
        let form = refund_form(&request)?;
        let body = self
            .call(
                Method::POST,
                "/v1/refunds",
                Some(&form),
                Some(&request.idempotency_key),
            )
            .await?;
        parse_refund(&body, request.amount.currency())
    }

    #[tracing::instrument(skip(self))]
    async fn payment_status(&self, intent_id: &str) -> Result<IntentStatus, GatewayError> {
        let body = self
            .call(
                Method::GET,
                &format!("/v1/payment_intents/{intent_id}"),
                None,
                None,
            )
            .await?;
        Ok(parse_intent(&body)?.status)
    }
}

fn transport_error(e: reqwest::Error) -> GatewayError {
    let code = if e.is_timeout() { "timeout" } else { "transport" };
    GatewayError::retryable(code, e.to_string())
}

/// 429 and 5xx may be retried with the same key; other 4xx need new input.
fn classify(status: StatusCode, body: &Value) -> GatewayError {
    let error = body.get("error");
    let field = |name: &str| error.and_then(|e| e.get(name)).and_then(Value::as_str);
    let code = field("code")
        .or_else(|| field("type"))
        .unwrap_or("http_error")
        .to_string();
    let message = field("message")
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));

    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        GatewayError::Retryable { code, message }
    } else {
        GatewayError::Terminal { code, message }
    }
}

fn minor_units(amount: &Money) -> Result<String, GatewayError> {
    amount
        .to_minor_units()
        .map(|units| units.to_string())
        .map_err(|e| GatewayError::terminal("amount_invalid", e.to_string()))
}

fn method_type(method: PaymentMethod) -> &'static str {
    match method {
        PaymentMethod::Card | PaymentMethod::ApplePay | PaymentMethod::GooglePay => "card",
        PaymentMethod::Paypal => "paypal",
        PaymentMethod::BankTransfer => "customer_balance",
        PaymentMethod::Crypto => "crypto",
    }
}

fn intent_form(request: &IntentRequest) -> Result<Form, GatewayError> {
    let mut form = vec![
        ("amount".to_string(), minor_units(&request.amount)?),
        (
            "currency".to_string(),
            request.amount.currency().as_str().to_ascii_lowercase(),
        ),
        (
            "payment_method_types[]".to_string(),
            method_type(request.method).to_string(),
        ),
        ("description".to_string(), request.description.clone()),
        (
            "metadata[booking_id]".to_string(),
            request.booking_id.to_string(),
        ),
    ];
    if let Some(split) = &request.split {
        form.push((
            "application_fee_amount".to_string(),
            minor_units(&split.application_fee)?,
        ));
        form.push((
            "transfer_data[destination]".to_string(),
            split.destination_account.clone(),
        ));
    }
    Ok(form)
}

fn refund_form(request: &RefundRequest) -> Result<Form, GatewayError> {
    Ok(vec![
        ("payment_intent".to_string(), request.intent_id.clone()),
        ("amount".to_string(), minor_units(&request.amount)?),
        ("reason".to_string(), "requested_by_customer".to_string()),
        ("metadata[reason]".to_string(), request.reason.clone()),
    ])
}

fn required_str<'a>(body: &'a Value, field: &str) -> Result<&'a str, GatewayError> {
    body.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::InvalidResponse(format!("missing {field}")))
}

fn parse_intent(body: &Value) -> Result<PaymentIntent, GatewayError> {
    Ok(PaymentIntent {
        id: required_str(body, "id")?.to_string(),
        client_secret: body
            .get("client_secret")
            .and_then(Value::as_str)
            .map(str::to_string),
        status: IntentStatus::from_provider(required_str(body, "status")?),
    })
}

fn parse_charge(body: &Value) -> Result<ChargeOutcome, GatewayError> {
    Ok(ChargeOutcome {
        status: IntentStatus::from_provider(required_str(body, "status")?),
        transaction_id: body
            .get("latest_charge")
            .and_then(Value::as_str)
            .map(str::to_string),
        failure_reason: body
            .pointer("/last_payment_error/message")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn parse_refund(body: &Value, currency: Currency) -> Result<RefundOutcome, GatewayError> {
    let units = body
        .get("amount")
        .and_then(Value::as_i64)
        .ok_or_else(|| GatewayError::InvalidResponse("missing amount".to_string()))?;
    Ok(RefundOutcome {
        refund_id: required_str(body, "id")?.to_string(),
        amount: Money::from_minor_units(units, currency),
        status: RefundStatus::from_provider(required_str(body, "status")?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::AggregateId;
    use domain::SplitPayout;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn usd(amount: rust_decimal::Decimal) -> Money {
        Money::new(amount, Currency::USD)
    }

    fn value<'a>(form: &'a Form, key: &str) -> Option<&'a str> {
        form.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    #[test]
    fn split_intent_form() {
        let booking_id = AggregateId::new();
        let form = intent_form(&IntentRequest {
            booking_id,
            amount: usd(dec!(386.40)),
            method: PaymentMethod::Card,
            description: "3 nights".to_string(),
            idempotency_key: "intent-x-1".to_string(),
            split: Some(SplitPayout {
                destination_account: "acct_123".to_string(),
                application_fee: usd(dec!(30)),
                supplier_amount: usd(dec!(356.40)),
            }),
        })
        .unwrap();

        assert_eq!(value(&form, "amount"), Some("38640"));
        assert_eq!(value(&form, "currency"), Some("usd"));
        assert_eq!(value(&form, "application_fee_amount"), Some("3000"));
        assert_eq!(value(&form, "transfer_data[destination]"), Some("acct_123"));
        assert_eq!(
            value(&form, "metadata[booking_id]"),
            Some(booking_id.to_string().as_str())
        );
    }

    #[test]
    fn plain_intent_has_no_transfer() {
        let form = intent_form(&IntentRequest {
            booking_id: AggregateId::new(),
            amount: usd(dec!(10)),
            method: PaymentMethod::Paypal,
            description: String::new(),
            idempotency_key: "k".to_string(),
            split: None,
        })
        .unwrap();
        assert_eq!(value(&form, "payment_method_types[]"), Some("paypal"));
        assert_eq!(value(&form, "transfer_data[destination]"), None);
        assert_eq!(value(&form, "application_fee_amount"), None);
    }

    #[test]
    fn classifies_http_failures() {
        let declined = json!({"error": {"code": "card_declined", "message": "Your card was declined."}});
        assert_eq!(
            classify(StatusCode::PAYMENT_REQUIRED, &declined),
            GatewayError::terminal("card_declined", "Your card was declined.")
        );
        assert!(classify(StatusCode::TOO_MANY_REQUESTS, &json!({})).is_retryable());
        assert!(classify(StatusCode::BAD_GATEWAY, &json!({})).is_retryable());
        assert!(!classify(StatusCode::BAD_REQUEST, &json!({})).is_retryable());
    }

    #[test]
    fn parses_responses() {
        let intent = parse_intent(&json!({
            "id": "pi_1", "client_secret": "pi_1_secret", "status": "requires_payment_method"
        }))
        .unwrap();
        assert_eq!(intent.status, IntentStatus::RequiresPaymentMethod);

        let charge = parse_charge(&json!({"status": "succeeded", "latest_charge": "ch_1"})).unwrap();
        assert_eq!(charge.transaction_id.as_deref(), Some("ch_1"));

        let refund =
            parse_refund(&json!({"id": "re_1", "amount": 5000, "status": "pending"}), Currency::USD)
                .unwrap();
        assert_eq!(refund.amount, usd(dec!(50)));
        assert_eq!(refund.status, RefundStatus::Pending);

        assert!(matches!(
            parse_intent(&json!({"status": "succeeded"})),
            Err(GatewayError::InvalidResponse(_))
        ));
    }
}
