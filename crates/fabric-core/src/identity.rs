//! Token generation, keyed-MAC hashing, and constant-time validation.
//!
//! Tokens are never stored in plaintext. Only `HMAC-SHA256(secret_key, token)`
//! is persisted, hex-encoded. Validation recomputes the MAC and compares it
//! to the stored hash through [`hmac::Mac::verify_slice`], which is
//! constant-time by construction — there is no early-return byte comparison
//! anywhere in this module.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::error::TokenError;

type HmacSha256 = Hmac<Sha256>;

/// Minimum accepted printable length for a plaintext token.
pub const MIN_TOKEN_LEN: usize = 41;

/// Number of random bytes used to generate a new token. Base64 URL-safe
/// (no padding) encoding of 32 bytes yields 43 printable characters, safely
/// above [`MIN_TOKEN_LEN`].
const TOKEN_RANDOM_BYTES: usize = 32;

/// Generate a new, cryptographically random, URL-safe plaintext token.
#[must_use]
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_RANDOM_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, bytes)
}

/// Compute the hex-encoded keyed MAC of a token, for storage.
///
/// # Panics
///
/// Never — `Hmac::new_from_slice` accepts keys of any length.
#[must_use]
pub fn hash_token(secret_key: &[u8], token: &str) -> String {
    #[allow(clippy::expect_used)]
    let mut mac = HmacSha256::new_from_slice(secret_key).expect("HMAC accepts keys of any length");
    mac.update(token.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Validate a plaintext token against a stored, hex-encoded MAC.
///
/// Rejects tokens shorter than [`MIN_TOKEN_LEN`] before doing any crypto —
/// callers are expected to perform this same length check before even
/// issuing the database lookup that produces `stored_hash_hex`, so that a
/// too-short token never reaches storage at all.
///
/// # Errors
///
/// - [`TokenError::TooShort`] if `provided` is shorter than the minimum.
/// - [`TokenError::MalformedHash`] if `stored_hash_hex` is not valid hex.
/// - [`TokenError::Mismatch`] if the recomputed MAC does not match.
pub fn verify_token(
    secret_key: &[u8],
    provided: &str,
    stored_hash_hex: &str,
) -> Result<(), TokenError> {
    if provided.len() < MIN_TOKEN_LEN {
        return Err(TokenError::TooShort);
    }

    let expected = hex::decode(stored_hash_hex).map_err(|_| TokenError::MalformedHash)?;

    #[allow(clippy::expect_used)]
    let mut mac = HmacSha256::new_from_slice(secret_key).expect("HMAC accepts keys of any length");
    mac.update(provided.as_bytes());

    mac.verify_slice(&expected).map_err(|_| TokenError::Mismatch)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-hmac-secret-at-least-32-bytes!";

    #[test]
    fn generated_tokens_meet_minimum_length() {
        for _ in 0..16 {
            let token = generate_token();
            assert!(token.len() >= MIN_TOKEN_LEN, "token too short: {token}");
        }
    }

    #[test]
    fn round_trips_through_hash_and_verify() {
        let token = generate_token();
        let hash = hash_token(SECRET, &token);
        assert!(verify_token(SECRET, &token, &hash).is_ok());
    }

    #[test]
    fn rejects_wrong_token() {
        let token = generate_token();
        let hash = hash_token(SECRET, &token);
        let other = generate_token();
        assert!(matches!(
            verify_token(SECRET, &other, &hash),
            Err(TokenError::Mismatch)
        ));
    }

    #[test]
    fn rejects_short_token_before_mac_check() {
        let err = verify_token(SECRET, "too-short", "deadbeef");
        assert!(matches!(err, Err(TokenError::TooShort)));
    }

    #[test]
    fn rejects_malformed_stored_hash() {
        let token = generate_token();
        let err = verify_token(SECRET, &token, "not-hex!!");
        assert!(matches!(err, Err(TokenError::MalformedHash)));
    }

    #[test]
    fn different_keys_do_not_verify() {
        let token = generate_token();
        let hash = hash_token(SECRET, &token);
        assert!(verify_token(b"a-completely-different-32-byte-key!", &token, &hash).is_err());
    }
}
