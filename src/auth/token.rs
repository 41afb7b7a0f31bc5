// JWT payload decoding
// Reads claims from an access token without verifying its signature

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::error::{ClientError, Result};

/// Claims of a decoded access token
pub type DecodedPayload = Map<String, Value>;

/// Decode the payload (middle) segment of a JWT
pub fn decode_payload(access_token: &str) -> Result<DecodedPayload> {
    let segment = access_token.split('.').nth(1).ok_or_else(|| {
        ClientError::MalformedToken("expected at least 2 dot-delimited segments".to_string())
    })?;

    // Tokens are issued without padding
    let mut padded = segment.to_string();
    while padded.len() % 4 != 0 {
        padded.push('=');
    }

    let bytes = URL_SAFE
        .decode(padded.as_bytes())
        .map_err(|e| ClientError::MalformedToken(format!("invalid base64 payload: {}", e)))?;

    let value: Value = serde_json::from_slice(&bytes)
        .map_err(|e| ClientError::MalformedToken(format!("invalid JSON payload: {}", e)))?;

    match value {
        Value::Object(claims) => Ok(claims),
        other => Err(ClientError::MalformedToken(format!(
            "payload is not a JSON object: {}",
            other
        ))),
    }
}

/// Read the `exp` claim (Unix seconds)
pub fn expiry_timestamp(access_token: &str) -> Result<f64> {
    decode_payload(access_token)?
        .get("exp")
        .and_then(Value::as_f64)
        .ok_or_else(|| ClientError::MissingClaim("exp".to_string()))
}

/// Expiry of the access token as a UTC timestamp
pub fn expires_at(access_token: &str) -> Result<DateTime<Utc>> {
    let exp = expiry_timestamp(access_token)?;
    Utc.timestamp_millis_opt((exp * 1000.0) as i64)
        .single()
        .ok_or_else(|| ClientError::MalformedToken(format!("exp out of range: {}", exp)))
}

/// Seconds until the access token expires, negative once it has expired.
///
/// Returns `None` when no token is held.
pub fn remaining_seconds(access_token: Option<&str>) -> Result<Option<f64>> {
    remaining_seconds_at(access_token, Utc::now())
}

/// Same as [`remaining_seconds`], measured against a fixed clock
pub fn remaining_seconds_at(access_token: Option<&str>, now: DateTime<Utc>) -> Result<Option<f64>> {
    let token = match access_token {
        Some(t) if !t.is_empty() => t,
        _ => return Ok(None),
    };

    let exp = expiry_timestamp(token)?;
    let now_secs = now.timestamp_millis() as f64 / 1000.0;
    Ok(Some(exp - now_secs))
}
