//! Webhook signature verification (HMAC-SHA256 over `"{t}.{payload}"`).

use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("Invalid signature header")]
    MalformedHeader,

    #[error("Signature mismatch")]
    Mismatch,

    #[error("Signature timestamp is {age_secs}s away from now")]
    Expired { age_secs: i64 },

    #[error("Webhook secret is not usable as an HMAC key")]
    InvalidKey,
}

/// Parsed `t=<unix>,v1=<hex>[,v1=<hex>...]` header.
struct SignatureHeader<'a> {
    timestamp: i64,
    signatures: Vec<&'a str>,
}

fn parse_header(header: &str) -> Result<SignatureHeader<'_>, SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        let part = part.trim();
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = Some(t.parse::<i64>().map_err(|_| SignatureError::MalformedHeader)?);
        } else if let Some(v) = part.strip_prefix("v1=") {
            signatures.push(v);
        }
    }

    match timestamp {
        Some(timestamp) if !signatures.is_empty() => Ok(SignatureHeader {
            timestamp,
            signatures,
        }),
        _ => Err(SignatureError::MalformedHeader),
    }
}

fn mac_for(payload: &[u8], secret: &str, timestamp: i64) -> Result<HmacSha256, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidKey)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Checks a provider signature against the raw request body.
///
/// Any `v1` entry may match; the provider sends several while a secret is
/// being rolled. Comparison is constant time.
pub fn verify(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance: Duration,
    now: DateTime<Utc>,
) -> Result<(), SignatureError> {
    let parsed = parse_header(header)?;
    let mac = mac_for(payload, secret, parsed.timestamp)?;

    let matched = parsed.signatures.iter().any(|candidate| {
        hex::decode(candidate)
            .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
            .unwrap_or(false)
    });
    if !matched {
        return Err(SignatureError::Mismatch);
    }

    let age_secs = now.timestamp() - parsed.timestamp;
    if age_secs.unsigned_abs() > tolerance.as_secs() {
        return Err(SignatureError::Expired { age_secs });
    }
    Ok(())
}

/// Produces a header the way the provider would. Used by tests and local
/// tooling that replays webhooks.
pub fn sign(payload: &[u8], secret: &str, timestamp: i64) -> Result<String, SignatureError> {
    let mac = mac_for(payload, secret, timestamp)?;
    let digest = hex::encode(mac.finalize().into_bytes());
    Ok(format!("t={timestamp},v1={digest}"))
}
