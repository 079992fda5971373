//! `Stripe-Signature` header verification.
//!
//! Header format: `t=<unix seconds>,v1=<hex hmac>[,v1=<hex hmac>...]`. The
//! signed payload is `<t>.<raw body>` under HMAC-SHA256 with the endpoint's
//! signing secret.

use crate::crypto::{constant_time_eq, hmac_sha256_hex};

/// Reasons a signature header is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    /// No `t=` element, or it is not an integer.
    #[error("missing or malformed timestamp")]
    MissingTimestamp,

    /// No `v1=` element.
    #[error("no v1 signatures present")]
    NoSignatures,

    /// None of the `v1` signatures match.
    #[error("signature mismatch")]
    Mismatch,

    /// The timestamp is outside the tolerance window.
    #[error("timestamp outside tolerance: age={age}s, tolerance={tolerance}s")]
    OutsideTolerance {
        /// Age of the signature in seconds (negative if in the future).
        age: i64,
        /// Allowed age in seconds.
        tolerance: u64,
    },

    /// The signing secret could not be used as a MAC key.
    #[error("unusable signing secret")]
    Secret,
}

/// Verify `header` against `payload`, returning the signed timestamp.
///
/// `now` is the current unix time in seconds.
pub fn verify_signature(
    payload: &str,
    header: &str,
    secret: &str,
    tolerance_seconds: u64,
    now: i64,
) -> Result<i64, SignatureError> {
    let mut timestamp: Option<&str> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", ts)) => timestamp = Some(ts),
            Some(("v1", sig)) => signatures.push(sig),
            _ => {}
        }
    }

    let raw_timestamp = timestamp.ok_or(SignatureError::MissingTimestamp)?;
    let signed_at: i64 = raw_timestamp
        .parse()
        .map_err(|_| SignatureError::MissingTimestamp)?;

    if signatures.is_empty() {
        return Err(SignatureError::NoSignatures);
    }

    let expected = hmac_sha256_hex(secret, &format!("{raw_timestamp}.{payload}"))
        .map_err(|_| SignatureError::Secret)?;
    if !signatures.iter().any(|sig| constant_time_eq(&expected, sig)) {
        return Err(SignatureError::Mismatch);
    }

    let age = now.saturating_sub(signed_at);
    if age.unsigned_abs() > tolerance_seconds {
        return Err(SignatureError::OutsideTolerance {
            age,
            tolerance: tolerance_seconds,
        });
    }

    Ok(signed_at)
}

/// Build a valid header for `payload` signed at `timestamp`.
///
/// Used by clients that replay events and by tests.
pub fn signature_header(payload: &str, secret: &str, timestamp: i64) -> Result<String, SignatureError> {
    let sig = hmac_sha256_hex(secret, &format!("{timestamp}.{payload}"))
        .map_err(|_| SignatureError::Secret)?;
    Ok(format!("t={timestamp},v1={sig}"))
}
