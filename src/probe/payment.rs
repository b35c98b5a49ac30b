//! x402 payment challenges.
//!
//! A service that wants payment answers with `402 Payment Required` and a
//! header holding base64-encoded JSON. The payload is either an object with
//! an `accepts` array of alternative payment options, a bare array of those
//! options, or a single option object. Only the first option is read.
//!
//! This module decodes challenges for the probe and encodes them for servers
//! that gate their own endpoints. It never signs, pays, or verifies payment.

use axum::Json;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::transport::ChallengeResponse;

/// Current challenge header.
pub const PAYMENT_REQUIRED_HEADER: &str = "payment-required";
/// Header used by earlier x402 servers.
pub const LEGACY_PAYMENT_REQUIRED_HEADER: &str = "x-payment-required";

pub const X402_VERSION: u32 = 1;

/// Why a challenge could not be read. Advisory only; never surfaced as a hard error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChallengeError {
    #[error("payment challenge undecodable: expected HTTP 402, got {0}")]
    NotPaymentRequired(u16),
    #[error("payment challenge undecodable: no challenge header or body")]
    Missing,
    #[error("payment challenge undecodable: bad base64: {0}")]
    Base64(String),
    #[error("payment challenge undecodable: bad json: {0}")]
    Json(String),
    #[error("payment challenge undecodable: no usable payment option")]
    NoOption,
}

/// What the probe reports about an agent's price.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pay_to: Option<String>,
}

impl PaymentRequirements {
    /// Read requirements out of a probe response.
    ///
    /// The status must be 402. The challenge is taken from the
    /// `PAYMENT-REQUIRED` header, then `X-PAYMENT-REQUIRED`, then a plain JSON body.
    pub fn from_challenge(response: &ChallengeResponse) -> Result<Self, ChallengeError> {
        if response.status != StatusCode::PAYMENT_REQUIRED.as_u16() {
            return Err(ChallengeError::NotPaymentRequired(response.status));
        }

        let header = response
            .header(PAYMENT_REQUIRED_HEADER)
            .or_else(|| response.header(LEGACY_PAYMENT_REQUIRED_HEADER));
        if let Some(value) = header {
            return decode_challenge_header(value);
        }

        if response.body.iter().all(u8::is_ascii_whitespace) {
            return Err(ChallengeError::Missing);
        }
        let value: Value = serde_json::from_slice(&response.body)
            .map_err(|e| ChallengeError::Json(e.to_string()))?;
        requirements_from_value(&value)
    }
}

/// Decode a base64 challenge header value.
pub fn decode_challenge_header(value: &str) -> Result<PaymentRequirements, ChallengeError> {
    let value = value.trim();
    let raw = STANDARD
        .decode(value)
        .or_else(|_| STANDARD_NO_PAD.decode(value.trim_end_matches('=')))
        .or_else(|_| URL_SAFE_NO_PAD.decode(value.trim_end_matches('=')))
        .map_err(|e| ChallengeError::Base64(e.to_string()))?;
    let json: Value =
        serde_json::from_slice(&raw).map_err(|e| ChallengeError::Json(e.to_string()))?;
    requirements_from_value(&json)
}

/// Pick the first payment option out of a decoded challenge payload.
pub fn requirements_from_value(value: &Value) -> Result<PaymentRequirements, ChallengeError> {
    let option = match value {
        Value::Object(obj) => match obj.get("accepts") {
            Some(Value::Array(accepts)) => accepts.first(),
            Some(_) => None,
            None => Some(value),
        },
        Value::Array(options) => options.first(),
        _ => None,
    }
    .and_then(Value::as_object)
    .ok_or(ChallengeError::NoOption)?;

    let text = |key: &str| -> Option<String> {
        match option.get(key)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    };

    let requirements = PaymentRequirements {
        amount: text("maxAmountRequired").or_else(|| text("amount")),
        network: text("network"),
        pay_to: text("payTo"),
    };
    if requirements == PaymentRequirements::default() {
        return Err(ChallengeError::NoOption);
    }
    Ok(requirements)
}

/// One accepted way to pay, as issued by a gated server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOption {
    /// Payment scheme, e.g. `exact`.
    pub scheme: String,
    /// Network name or CAIP-2 id, e.g. `base` or `eip155:8453`.
    pub network: String,
    /// Amount in the asset's smallest unit.
    pub max_amount_required: String,
    pub resource: String,
    #[serde(default)]
    pub description: String,
    pub pay_to: String,
    #[serde(default)]
    pub max_timeout_seconds: u64,
    /// Token contract address.
    pub asset: String,
}

/// A full challenge payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentChallenge {
    pub x402_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub accepts: Vec<PaymentOption>,
}

impl PaymentChallenge {
    pub fn new(accepts: Vec<PaymentOption>) -> Self {
        Self {
            x402_version: X402_VERSION,
            error: None,
            accepts,
        }
    }

    /// Base64 header form of the challenge.
    pub fn encode_header(&self) -> String {
        // Serializing plain strings and integers cannot fail.
        let json = serde_json::to_vec(self).unwrap_or_default();
        STANDARD.encode(json)
    }
}

/// Build the `402 Payment Required` response that gates an endpoint.
///
/// The challenge travels in the `PAYMENT-REQUIRED` header and, for older
/// clients, as the JSON body.
pub fn payment_required_response(challenge: &PaymentChallenge) -> Response {
    let header = HeaderValue::from_str(&challenge.encode_header());
    match header {
        Ok(value) => (
            StatusCode::PAYMENT_REQUIRED,
            [(HeaderName::from_static(PAYMENT_REQUIRED_HEADER), value)],
            Json(challenge.clone()),
        )
            .into_response(),
        Err(_) => (StatusCode::PAYMENT_REQUIRED, Json(challenge.clone())).into_response(),
    }
}
