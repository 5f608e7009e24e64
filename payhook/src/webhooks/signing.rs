//! Signature verification for inbound provider webhooks.
//!
//! Both providers sign the raw request body, so verification must run on the exact bytes
//! received, before any JSON parsing.
//!
//! - Stripe: `Stripe-Signature: t=<unix>,v1=<hex>`. Checked by the Stripe SDK
//!   (`Webhook::construct_event`), which also enforces the replay window.
//! - Coinbase Commerce: `X-CC-Webhook-Signature: <hex>`, `hex(HMAC-SHA256(secret, body))`.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use stripe_webhook::{Webhook, WebhookError};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

pub const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";
pub const COINBASE_SIGNATURE_HEADER: &str = "x-cc-webhook-signature";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("missing {0} header")]
    MissingHeader(&'static str),

    #[error("malformed signature header")]
    MalformedHeader,

    #[error("payload is not valid UTF-8")]
    MalformedPayload,

    #[error("signature timestamp outside the allowed window")]
    TimestampOutOfTolerance,

    #[error("signature does not match payload")]
    Mismatch,

    #[error("webhook secret is not usable as an HMAC key")]
    InvalidSecret,
}

fn hmac_hex(secret: &str, parts: &[&[u8]]) -> Result<String, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidSecret)?;
    for part in parts {
        mac.update(part);
    }
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

/// Build a `Stripe-Signature` header value for `payload`, as Stripe would send it.
#[cfg(test)]
pub fn sign_stripe_payload(payload: &[u8], secret: &str, timestamp: i64) -> Result<String, SignatureError> {
    let signature = hmac_hex(secret, &[timestamp.to_string().as_bytes(), b".", payload])?;
    Ok(format!("t={timestamp},v1={signature}"))
}

/// Verify a `Stripe-Signature` header against the raw body.
///
/// The SDK verifies the signature and timestamp before it deserializes the event. Payload
/// parsing is done by [`crate::webhooks::events`], so an SDK parse failure after a good
/// signature still counts as verified.
pub fn verify_stripe_signature(payload: &[u8], header: &str, secret: &str) -> Result<(), SignatureError> {
    let payload = std::str::from_utf8(payload).map_err(|_| SignatureError::MalformedPayload)?;

    match Webhook::construct_event(payload, header, secret) {
        Ok(_) => Ok(()),
        Err(WebhookError::BadParse(e)) => {
            debug!("Stripe SDK could not deserialize a verified event: {e}");
            Ok(())
        }
        Err(WebhookError::BadSignature) => Err(SignatureError::Mismatch),
        Err(WebhookError::BadTimestamp(_)) => Err(SignatureError::TimestampOutOfTolerance),
        Err(WebhookError::BadKey) => Err(SignatureError::InvalidSecret),
        Err(e) => {
            debug!("Stripe signature header rejected: {e}");
            Err(SignatureError::MalformedHeader)
        }
    }
}

/// Build an `X-CC-Webhook-Signature` header value for `payload`.
pub fn sign_coinbase_payload(payload: &[u8], secret: &str) -> Result<String, SignatureError> {
    hmac_hex(secret, &[payload])
}

/// Verify an `X-CC-Webhook-Signature` header against the raw body.
pub fn verify_coinbase_signature(payload: &[u8], header: &str, secret: &str) -> Result<(), SignatureError> {
    let provided = header.trim().to_ascii_lowercase();
    if provided.is_empty() || !provided.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(SignatureError::MalformedHeader);
    }

    let expected = hmac_hex(secret, &[payload])?;
    if constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";
    const BODY: &[u8] = br#"{"id":"evt_1","type":"checkout.session.completed"}"#;

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    #[test]
    fn test_stripe_signature_verifies() {
        let header = sign_stripe_payload(BODY, SECRET, now()).unwrap();
        assert_eq!(verify_stripe_signature(BODY, &header, SECRET), Ok(()));
    }

    #[test]
    fn test_stripe_signature_rejects_modified_body() {
        let header = sign_stripe_payload(BODY, SECRET, now()).unwrap();
        let tampered = br#"{"id":"evt_1","type":"checkout.session.completed" }"#;
        assert_eq!(verify_stripe_signature(tampered, &header, SECRET), Err(SignatureError::Mismatch));
    }

    #[test]
    fn test_stripe_signature_rejects_wrong_secret() {
        let header = sign_stripe_payload(BODY, "whsec_other", now()).unwrap();
        assert_eq!(verify_stripe_signature(BODY, &header, SECRET), Err(SignatureError::Mismatch));
    }

    #[test]
    fn test_stripe_signature_replay_window() {
        let stale = sign_stripe_payload(BODY, SECRET, now() - 3600).unwrap();
        assert_eq!(
            verify_stripe_signature(BODY, &stale, SECRET),
            Err(SignatureError::TimestampOutOfTolerance)
        );

        let future = sign_stripe_payload(BODY, SECRET, now() + 3600).unwrap();
        assert_eq!(
            verify_stripe_signature(BODY, &future, SECRET),
            Err(SignatureError::TimestampOutOfTolerance)
        );
    }

    #[test]
    fn test_stripe_signature_malformed_headers() {
        let timestamp_only = format!("t={}", now());
        for header in ["", "garbage", "t=abc,v1=deadbeef", "v1=deadbeef", timestamp_only.as_str()] {
            assert!(
                verify_stripe_signature(BODY, header, SECRET).is_err(),
                "header {header:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_stripe_signature_rejects_non_utf8_body() {
        let body: &[u8] = &[0xff, 0xfe, 0x00];
        let header = sign_stripe_payload(body, SECRET, now()).unwrap();
        assert_eq!(
            verify_stripe_signature(body, &header, SECRET),
            Err(SignatureError::MalformedPayload)
        );
    }

    #[test]
    fn test_coinbase_signature_verifies_case_insensitively() {
        let signature = sign_coinbase_payload(BODY, SECRET).unwrap();
        assert_eq!(signature.len(), 64);
        assert_eq!(verify_coinbase_signature(BODY, &signature, SECRET), Ok(()));
        assert_eq!(verify_coinbase_signature(BODY, &signature.to_uppercase(), SECRET), Ok(()));
    }

    #[test]
    fn test_coinbase_signature_rejections() {
        let signature = sign_coinbase_payload(BODY, SECRET).unwrap();
        assert_eq!(
            verify_coinbase_signature(b"{}", &signature, SECRET),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            verify_coinbase_signature(BODY, "not-hex!", SECRET),
            Err(SignatureError::MalformedHeader)
        );
        assert_eq!(verify_coinbase_signature(BODY, "  ", SECRET), Err(SignatureError::MalformedHeader));
    }
}
