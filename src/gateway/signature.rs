use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::errors::ServiceError;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
pub const TIMESTAMP_HEADER: &str = "x-webhook-timestamp";

/// Timestamps above this are treated as milliseconds since the epoch.
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WebhookSignatureError {
    #[error("webhook secret is not configured")]
    NotConfigured,
    #[error("missing {0} header")]
    MissingHeader(&'static str),
    #[error("webhook timestamp is not a number")]
    InvalidTimestamp,
    #[error("webhook timestamp outside the accepted window")]
    Expired,
    #[error("webhook signature does not match")]
    Mismatch,
}

impl From<WebhookSignatureError> for ServiceError {
    fn from(err: WebhookSignatureError) -> Self {
        ServiceError::SignatureError(err.to_string())
    }
}

fn mac_for(secret: &str, timestamp: &str, body: &[u8]) -> Result<HmacSha256, WebhookSignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| WebhookSignatureError::NotConfigured)?;
    mac.update(timestamp.as_bytes());
    mac.update(body);
    Ok(mac)
}

/// Computes `base64(HMAC-SHA256(secret, timestamp ‖ body))`, the value the
/// gateway puts in the signature header.
pub fn sign_webhook(
    secret: &str,
    timestamp: &str,
    body: &[u8],
) -> Result<String, WebhookSignatureError> {
    let mac = mac_for(secret, timestamp, body)?;
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Verifies a webhook delivery before its payload is trusted.
///
/// The timestamp must be within `tolerance_secs` of `now` (seconds or
/// milliseconds are accepted) and the signature is compared in constant time.
pub fn verify_webhook_signature(
    secret: &str,
    signature: Option<&str>,
    timestamp: Option<&str>,
    body: &[u8],
    tolerance_secs: u64,
    now: DateTime<Utc>,
) -> Result<(), WebhookSignatureError> {
    if secret.is_empty() {
        return Err(WebhookSignatureError::NotConfigured);
    }
    let signature = signature
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(WebhookSignatureError::MissingHeader(SIGNATURE_HEADER))?;
    let timestamp = timestamp
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(WebhookSignatureError::MissingHeader(TIMESTAMP_HEADER))?;

    let raw_ts: i64 = timestamp
        .parse()
        .map_err(|_| WebhookSignatureError::InvalidTimestamp)?;
    let ts_secs = if raw_ts > MILLIS_THRESHOLD {
        raw_ts / 1000
    } else {
        raw_ts
    };
    if now.timestamp().abs_diff(ts_secs) > tolerance_secs {
        return Err(WebhookSignatureError::Expired);
    }

    let provided = STANDARD
        .decode(signature)
        .map_err(|_| WebhookSignatureError::Mismatch)?;
    mac_for(secret, timestamp, body)?
        .verify_slice(&provided)
        .map_err(|_| WebhookSignatureError::Mismatch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const SECRET: &str = "cf_test_secret";
    const BODY: &[u8] = br#"{"order_id":"ord_1","order_status":"PAID"}"#;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn accepts_valid_signature_in_seconds_and_millis() {
        for ts in ["1700000000", "1700000000123"] {
            let sig = sign_webhook(SECRET, ts, BODY).unwrap();
            assert_eq!(
                verify_webhook_signature(SECRET, Some(&sig), Some(ts), BODY, 300, now()),
                Ok(())
            );
        }
    }

    #[test]
    fn rejects_tampered_body() {
        let ts = "1700000000";
        let sig = sign_webhook(SECRET, ts, BODY).unwrap();
        let tampered = br#"{"order_id":"ord_2","order_status":"PAID"}"#;
        assert_matches!(
            verify_webhook_signature(SECRET, Some(&sig), Some(ts), tampered, 300, now()),
            Err(WebhookSignatureError::Mismatch)
        );
    }

    #[test]
    fn rejects_wrong_secret_and_garbage() {
        let ts = "1700000000";
        let sig = sign_webhook("other-secret", ts, BODY).unwrap();
        assert_matches!(
            verify_webhook_signature(SECRET, Some(&sig), Some(ts), BODY, 300, now()),
            Err(WebhookSignatureError::Mismatch)
        );
        assert_matches!(
            verify_webhook_signature(SECRET, Some("not base64!"), Some(ts), BODY, 300, now()),
            Err(WebhookSignatureError::Mismatch)
        );
    }

    #[test]
    fn rejects_missing_headers() {
        assert_matches!(
            verify_webhook_signature(SECRET, None, Some("1700000000"), BODY, 300, now()),
            Err(WebhookSignatureError::MissingHeader(SIGNATURE_HEADER))
        );
        assert_matches!(
            verify_webhook_signature(SECRET, Some("abc"), None, BODY, 300, now()),
            Err(WebhookSignatureError::MissingHeader(TIMESTAMP_HEADER))
        );
    }

    #[test]
    fn rejects_stale_timestamp() {
        let ts = "1699999000";
        let sig = sign_webhook(SECRET, ts, BODY).unwrap();
        assert_matches!(
            verify_webhook_signature(SECRET, Some(&sig), Some(ts), BODY, 300, now()),
            Err(WebhookSignatureError::Expired)
        );
    }

    #[test]
    fn extreme_timestamps_are_expired_not_overflowed() {
        for ts in ["-9223372036854775000", "-9223372036854775808", "9223372036854775807"] {
            assert_matches!(
                verify_webhook_signature(SECRET, Some("AAAA"), Some(ts), BODY, 300, now()),
                Err(WebhookSignatureError::Expired),
                "timestamp {ts}"
            );
        }
    }

    #[test]
    fn empty_secret_never_verifies() {
        assert_matches!(
            verify_webhook_signature("", Some("abc"), Some("1700000000"), BODY, 300, now()),
            Err(WebhookSignatureError::NotConfigured)
        );
    }
}
