//! Local inspection of JWT access tokens.
//!
//! Signatures are not verified here; that is the server's job. These helpers
//! only answer "is this token shaped like a JWT and not yet expired", and
//! they never panic on arbitrary input.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Claims read from an access token's payload.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenClaims {
    /// NumericDate; may carry a fractional part.
    pub exp: f64,
    #[serde(default)]
    pub token_type: Option<String>,
}

fn decode_segment(segment: &str) -> Option<Map<String, Value>> {
    let trimmed = segment.trim_end_matches('=');
    if trimmed.is_empty() {
        return None;
    }
    let bytes = URL_SAFE_NO_PAD.decode(trimmed).ok()?;
    match serde_json::from_slice::<Value>(&bytes).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Decode the claims of `token` without verifying its signature.
pub fn decode_claims(token: &str) -> Option<TokenClaims> {
    let mut parts = token.split('.');
    let (header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    decode_segment(header)?;
    let payload = decode_segment(payload)?;
    serde_json::from_value(Value::Object(payload)).ok()
}

/// Expiry embedded in the token, if it can be read.
pub fn expires_at(token: &str) -> Option<DateTime<Utc>> {
    let claims = decode_claims(token)?;
    if !claims.exp.is_finite() {
        return None;
    }
    let secs = claims.exp.floor();
    if secs < i64::MIN as f64 || secs > i64::MAX as f64 {
        return None;
    }
    Utc.timestamp_opt(secs as i64, 0).single()
}

/// Check validity against an explicit clock.
pub fn is_valid_at(token: &str, now: DateTime<Utc>) -> bool {
    expires_at(token).map(|exp| exp > now).unwrap_or(false)
}

/// True if `token` is a decodable JWT whose expiry is still in the future.
pub fn is_valid(token: &str) -> bool {
    is_valid_at(token, Utc::now())
}

/// Minutes until the token expires (0 once expired or unreadable)
pub fn minutes_until_expiry(token: &str) -> i64 {
    expires_at(token)
        .map(|exp| (exp - Utc::now()).num_minutes().max(0))
        .unwrap_or(0)
}
