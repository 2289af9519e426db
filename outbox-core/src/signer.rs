//! HMAC-SHA256 payload signing for outbound webhook deliveries.
//!
//! Pure function, no I/O, deterministic given inputs. The message signed is
//! `"<timestamp>.<payload>"` where `payload` is the verbatim stored
//! [`crate::models::OutboxEvent`] payload string -- never the delivery
//! envelope wrapped around it.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Sign `payload` with `secret`, returning the lowercase hex signature and
/// the Unix timestamp used. Pass `timestamp` to make the result
/// reproducible (tests, replay); omit it to sign with the current time.
pub fn sign(payload: &str, secret: &str, timestamp: Option<i64>) -> (String, i64) {
    let timestamp = timestamp.unwrap_or_else(|| chrono::Utc::now().timestamp());
    let message = format!("{timestamp}.{payload}");

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts a key of any size");
    mac.update(message.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    (signature, timestamp)
}

/// Recompute the signature for `(payload, secret, timestamp)` and compare
/// against `signature` in constant time.
pub fn verify(payload: &str, secret: &str, signature: &str, timestamp: i64) -> bool {
    let (expected, _) = sign(payload, secret, Some(timestamp));

    // Constant-time comparison over raw bytes; hex length mismatches are
    // not a timing oracle since `ct_eq` requires equal-length slices and
    // legitimate signatures are always 64 hex chars.
    expected.as_bytes().len() == signature.as_bytes().len()
        && expected.as_bytes().ct_eq(signature.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_64_char_lowercase_hex() {
        let (sig, ts) = sign(r#"{"event":"test"}"#, "test-secret-key-1234", Some(1_000_000));
        assert_eq!(ts, 1_000_000);
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn signing_is_deterministic() {
        let (sig1, _) = sign("payload", "secret", Some(42));
        let (sig2, _) = sign("payload", "secret", Some(42));
        assert_eq!(sig1, sig2);
    }

    #[test]
    fn verify_round_trips() {
        let payload = r#"{"a":1}"#;
        let secret = "another-long-enough-secret";
        let (sig, ts) = sign(payload, secret, None);
        assert!(verify(payload, secret, &sig, ts));
    }

    #[test]
    fn verify_rejects_tampering() {
        let payload = r#"{"a":1}"#;
        let secret = "another-long-enough-secret";
        let (sig, ts) = sign(payload, secret, Some(5));

        assert!(!verify("different payload", secret, &sig, ts));
        assert!(!verify(payload, "wrong-secret-value", &sig, ts));
        assert!(!verify(payload, secret, "0".repeat(64).as_str(), ts));
        assert!(!verify(payload, secret, &sig, ts + 1));
    }
}
