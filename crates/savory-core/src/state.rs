//! # Signed State Codec
//!
//! Encodes and decodes the tamper-evident, time-boxed token that carries a
//! tenant id through the OAuth redirect round-trip.
//!
//! ## Token Format
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                  tenant_id : nonce : unix_ts : mac16                    │
//! │                                                                         │
//! │  tenant_id   UUID of the tenant starting the OAuth flow                 │
//! │  nonce       16 random bytes, hex — makes every token unique            │
//! │  unix_ts     issue time, seconds — bounds replay to a 10 minute window  │
//! │  mac16       first 16 hex chars of HMAC-SHA256(secret, payload)         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! No state is persisted: validity is purely a function of the token
//! contents, the server secret, and the current time. `decode` fails closed
//! on tamper, expiry, or malformed structure.

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Replay containment window for state tokens.
pub const STATE_MAX_AGE_SECS: i64 = 600;

/// Length of the truncated MAC, in hex characters.
const MAC_LEN: usize = 16;

// =============================================================================
// Encoding
// =============================================================================

/// Builds a signed state token for `tenant_id`, issued now.
pub fn encode_state(tenant_id: &str, secret: &str) -> String {
    let mut nonce_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    encode_state_at(tenant_id, secret, Utc::now(), &hex::encode(nonce_bytes))
}

/// Builds a signed state token with an explicit clock and nonce.
///
/// Exposed for deterministic tests; production callers use [`encode_state`].
pub fn encode_state_at(
    tenant_id: &str,
    secret: &str,
    issued_at: DateTime<Utc>,
    nonce: &str,
) -> String {
    let payload = format!("{}:{}:{}", tenant_id, nonce, issued_at.timestamp());
    let mac = sign(&payload, secret);
    format!("{}:{}", payload, mac)
}

// =============================================================================
// Decoding
// =============================================================================

/// Decodes and validates a state token, returning the embedded tenant id.
///
/// Fails closed (`None`) if the structure cannot be parsed, the MAC does
/// not match, or the token is older than [`STATE_MAX_AGE_SECS`].
pub fn decode_state(token: &str, secret: &str) -> Option<String> {
    decode_state_at(token, secret, Utc::now())
}

/// Decode with an explicit clock; see [`decode_state`].
pub fn decode_state_at(token: &str, secret: &str, now: DateTime<Utc>) -> Option<String> {
    // rsplitn: tenant ids may themselves contain separators in principle,
    // so split from the right where the format is fixed.
    let mut parts = token.rsplitn(4, ':');
    let mac = parts.next()?;
    let ts_str = parts.next()?;
    let nonce = parts.next()?;
    let tenant_id = parts.next()?;

    if tenant_id.is_empty() || nonce.is_empty() {
        return None;
    }

    let payload = format!("{}:{}:{}", tenant_id, nonce, ts_str);
    let expected = sign(&payload, secret);
    if !constant_time_eq(mac.as_bytes(), expected.as_bytes()) {
        return None;
    }

    let issued_ts: i64 = ts_str.parse().ok()?;
    let age = now.signed_duration_since(DateTime::from_timestamp(issued_ts, 0)?);
    if age > Duration::seconds(STATE_MAX_AGE_SECS) || age < Duration::seconds(-STATE_MAX_AGE_SECS) {
        return None;
    }

    Some(tenant_id.to_string())
}

// =============================================================================
// Internals
// =============================================================================

/// Truncated hex HMAC over the payload.
fn sign(payload: &str, secret: &str) -> String {
    // HMAC accepts keys of any length; new_from_slice cannot fail.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
    mac.update(payload.as_bytes());
    let digest = mac.finalize().into_bytes();
    hex::encode(digest)[..MAC_LEN].to_string()
}

/// Constant-time byte comparison for the truncated MAC.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-signing-secret";

    #[test]
    fn test_roundtrip() {
        let token = encode_state("tenant-123", SECRET);
        assert_eq!(decode_state(&token, SECRET).as_deref(), Some("tenant-123"));
    }

    #[test]
    fn test_tamper_rejected() {
        let token = encode_state("tenant-123", SECRET);

        // Flip the tenant id
        let forged = token.replacen("tenant-123", "tenant-999", 1);
        assert_eq!(decode_state(&forged, SECRET), None);

        // Flip one MAC character
        let mut chars: Vec<char> = token.chars().collect();
        let last = chars.len() - 1;
        chars[last] = if chars[last] == 'a' { 'b' } else { 'a' };
        let corrupted: String = chars.into_iter().collect();
        assert_eq!(decode_state(&corrupted, SECRET), None);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = encode_state("tenant-123", SECRET);
        assert_eq!(decode_state(&token, "other-secret"), None);
    }

    #[test]
    fn test_expired_rejected() {
        let issued = Utc::now() - Duration::seconds(STATE_MAX_AGE_SECS + 30);
        let token = encode_state_at("tenant-123", SECRET, issued, "deadbeef");
        assert_eq!(decode_state(&token, SECRET), None);
    }

    #[test]
    fn test_future_dated_rejected() {
        // A token "issued" far in the future is as suspect as an old one.
        let issued = Utc::now() + Duration::seconds(STATE_MAX_AGE_SECS + 30);
        let token = encode_state_at("tenant-123", SECRET, issued, "deadbeef");
        assert_eq!(decode_state(&token, SECRET), None);
    }

    #[test]
    fn test_garbage_rejected() {
        assert_eq!(decode_state("", SECRET), None);
        assert_eq!(decode_state("not-a-token", SECRET), None);
        assert_eq!(decode_state("a:b:c", SECRET), None);
        assert_eq!(decode_state(":::", SECRET), None);
    }

    #[test]
    fn test_within_window_accepted() {
        let issued = Utc::now() - Duration::seconds(STATE_MAX_AGE_SECS - 60);
        let token = encode_state_at("tenant-123", SECRET, issued, "deadbeef");
        assert_eq!(decode_state(&token, SECRET).as_deref(), Some("tenant-123"));
    }
}
