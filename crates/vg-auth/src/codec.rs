//! Local decoding of the access token's embedded expiry.
//!
//! Access tokens are self-describing, so "is this about to expire" never needs
//! a network call. Decoding is fail-closed: a token whose expiry cannot be read
//! is always treated as due for renewal.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::errors::MalformedTokenError;

/// Reads the expiry out of an opaque access token
pub trait CredentialCodec: Send + Sync {
    fn decode_expiry(&self, access_token: &str) -> Result<DateTime<Utc>, MalformedTokenError>;
}

/// Codec for JWT-shaped tokens carrying an `exp` claim (seconds since the epoch)
#[derive(Debug, Clone, Copy, Default)]
pub struct JwtExpiryCodec;

#[derive(Deserialize)]
struct ExpiryClaims {
    exp: Option<serde_json::Number>,
}

impl CredentialCodec for JwtExpiryCodec {
    fn decode_expiry(&self, access_token: &str) -> Result<DateTime<Utc>, MalformedTokenError> {
        let mut segments = access_token.split('.');
        let payload = match (segments.next(), segments.next(), segments.next(), segments.next()) {
            (Some(_), Some(payload), Some(_), None) if !payload.is_empty() => payload,
            _ => {
                return Err(MalformedTokenError(
                    "expected three dot-separated segments".to_string(),
                ));
            }
        };

        // Issuers disagree on padding; accept both forms.
        let bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .or_else(|_| URL_SAFE.decode(payload))
            .map_err(|e| MalformedTokenError(format!("payload is not base64url: {}", e)))?;

        let claims: ExpiryClaims = serde_json::from_slice(&bytes)
            .map_err(|e| MalformedTokenError(format!("payload is not a JSON object: {}", e)))?;

        let exp = claims
            .exp
            .ok_or_else(|| MalformedTokenError("missing exp claim".to_string()))?;
        let seconds = exp
            .as_i64()
            .or_else(|| exp.as_f64().map(|f| f as i64))
            .ok_or_else(|| MalformedTokenError("exp claim out of range".to_string()))?;

        DateTime::from_timestamp(seconds, 0)
            .ok_or_else(|| MalformedTokenError("exp claim out of range".to_string()))
    }
}

/// Whether the token should be renewed given the remaining-lifetime threshold.
///
/// Undecodable tokens always need renewal.
pub fn renewal_due(
    codec: &dyn CredentialCodec,
    access_token: &str,
    now: DateTime<Utc>,
    threshold: Duration,
) -> bool {
    match codec.decode_expiry(access_token) {
        Ok(expiry) => {
            let remaining = expiry - now;
            debug!(remaining_secs = remaining.num_seconds(), "Checked access token lifetime");
            // Negative remaining lifetime does not convert: already expired.
            remaining.to_std().map_or(true, |left| left <= threshold)
        }
        Err(e) => {
            debug!("Treating undecodable access token as expiring: {}", e);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::jwt_expiring_at;

    #[test]
    fn test_decodes_exp_claim() {
        let exp = DateTime::from_timestamp(1_900_000_000, 0).unwrap();
        let decoded = JwtExpiryCodec.decode_expiry(&jwt_expiring_at(exp)).unwrap();
        assert_eq!(decoded, exp);
    }

    #[test]
    fn test_accepts_padded_payload() {
        let header = URL_SAFE.encode(br#"{"alg":"none"}"#);
        let payload = URL_SAFE.encode(br#"{"exp":1900000000}"#);
        let token = format!("{}.{}.x", header, payload);
        assert_eq!(JwtExpiryCodec.decode_expiry(&token).unwrap().timestamp(), 1_900_000_000);
    }

    #[test]
    fn test_rejects_garbage() {
        for token in ["", "opaque", "a.b", "a.b.c.d", "a.!!!.c", "a..c"] {
            assert!(JwtExpiryCodec.decode_expiry(token).is_err(), "{token:?} decoded");
        }
    }

    #[test]
    fn test_rejects_missing_exp() {
        let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"7"}"#);
        let token = format!("h.{}.s", payload);
        let err = JwtExpiryCodec.decode_expiry(&token).unwrap_err();
        assert!(err.0.contains("exp"));
    }

    #[test]
    fn test_unparseable_token_is_always_due() {
        let now = Utc::now();
        for token in ["", "not-a-token", "x.y.z", "\u{1F512}.\u{1F512}.\u{1F512}"] {
            assert!(renewal_due(&JwtExpiryCodec, token, now, Duration::ZERO));
        }
    }

    #[test]
    fn test_threshold_boundary() {
        let issued = DateTime::from_timestamp(1_800_000_000, 0).unwrap();
        let token = jwt_expiring_at(issued + chrono::Duration::seconds(1800));
        let threshold = Duration::from_secs(300);

        let at_1499 = issued + chrono::Duration::seconds(1499);
        let at_1500 = issued + chrono::Duration::seconds(1500);
        assert!(!renewal_due(&JwtExpiryCodec, &token, at_1499, threshold));
        assert!(renewal_due(&JwtExpiryCodec, &token, at_1500, threshold));
    }
}
