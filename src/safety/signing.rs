//! Webhook envelope signing and replay protection.
//!
//! Signatures are HMAC-SHA256 over `"<timestamp>.<payload>"` with the
//! server secret. Verification rejects timestamps outside the skew window
//! before comparing, and the comparison itself is constant-time over
//! equal-length inputs (a length mismatch fails immediately, which leaks
//! nothing useful).

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Default replay window.
pub fn default_max_skew() -> Duration {
    Duration::minutes(5)
}

#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("unparseable signature timestamp '{0}'")]
    BadTimestamp(String),
    #[error("signature timestamp too old or too far in the future")]
    TooOld,
    #[error("signature mismatch")]
    Mismatch,
}

/// Sign `payload` bytes for the given ISO-8601 timestamp.
pub fn sign(secret: &str, payload: &[u8], timestamp_iso: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(timestamp_iso.as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Verify a signature produced by [`sign`] against the skew window.
pub fn verify(
    secret: &str,
    payload: &[u8],
    signature_hex: &str,
    timestamp_iso: &str,
    max_skew: Duration,
    now: DateTime<Utc>,
) -> Result<(), SigningError> {
    let stamped = DateTime::parse_from_rfc3339(timestamp_iso)
        .map_err(|_| SigningError::BadTimestamp(timestamp_iso.to_string()))?
        .with_timezone(&Utc);

    let skew = (now - stamped).abs();
    if skew > max_skew {
        return Err(SigningError::TooOld);
    }

    let expected = sign(secret, payload, timestamp_iso);
    if constant_time_eq(expected.as_bytes(), signature_hex.as_bytes()) {
        Ok(())
    } else {
        Err(SigningError::Mismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "unit-secret";

    #[test]
    fn signing_is_deterministic() {
        let ts = "2026-03-01T10:00:00+00:00";
        assert_eq!(sign(SECRET, b"{}", ts), sign(SECRET, b"{}", ts));
    }

    #[test]
    fn signature_changes_with_timestamp() {
        let a = sign(SECRET, b"{}", "2026-03-01T10:00:00+00:00");
        let b = sign(SECRET, b"{}", "2026-03-01T10:00:01+00:00");
        assert_ne!(a, b);
    }

    #[test]
    fn fresh_signatures_verify() {
        let now = Utc::now();
        let ts = now.to_rfc3339();
        let sig = sign(SECRET, b"payload", &ts);
        assert!(verify(SECRET, b"payload", &sig, &ts, default_max_skew(), now).is_ok());
    }

    #[test]
    fn stale_signatures_are_rejected() {
        let stamped = Utc::now();
        let ts = stamped.to_rfc3339();
        let sig = sign(SECRET, b"payload", &ts);
        // Replay 10 minutes later: outside the 5 minute window.
        let later = stamped + Duration::minutes(10);
        let err = verify(SECRET, b"payload", &sig, &ts, default_max_skew(), later).unwrap_err();
        assert!(matches!(err, SigningError::TooOld));
    }

    #[test]
    fn tampered_payloads_fail() {
        let now = Utc::now();
        let ts = now.to_rfc3339();
        let sig = sign(SECRET, b"payload", &ts);
        let err = verify(SECRET, b"tampered", &sig, &ts, default_max_skew(), now).unwrap_err();
        assert!(matches!(err, SigningError::Mismatch));
    }

    #[test]
    fn garbage_timestamps_fail_before_comparison() {
        let err = verify(
            SECRET,
            b"payload",
            "deadbeef",
            "not-a-timestamp",
            default_max_skew(),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, SigningError::BadTimestamp(_)));
    }

    #[test]
    fn length_mismatch_fails_without_panicking() {
        let now = Utc::now();
        let ts = now.to_rfc3339();
        let err = verify(SECRET, b"payload", "abc", &ts, default_max_skew(), now).unwrap_err();
        assert!(matches!(err, SigningError::Mismatch));
    }
}
