//! Secret hashing and random identifier generation
//!
//! Secrets (admin passwords, client secrets) are never stored in plaintext:
//! `hash_secret` produces a salted HMAC-SHA256 digest and `verify_secret`
//! re-computes it for comparison.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const SALT_LENGTH: usize = 16;

/// URL-safe alphabet for generated identifiers (channels, token ids)
const ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Generate a random URL-safe string of the given length
pub fn random_string(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| {
            let idx = rng.random_range(0..ID_ALPHABET.len());
            ID_ALPHABET[idx] as char
        })
        .collect()
}

/// Hash a secret with a fresh random salt
///
/// Output format: `<base64(salt)>.<base64(hmac)>`
pub fn hash_secret(secret: &str) -> String {
    let mut salt = [0u8; SALT_LENGTH];
    rand::rng().fill(&mut salt);

    format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(salt),
        URL_SAFE_NO_PAD.encode(digest(&salt, secret))
    )
}

/// Verify a secret against a stored `hash_secret` value
pub fn verify_secret(secret: &str, stored: &str) -> bool {
    let Some((salt_b64, mac_b64)) = stored.split_once('.') else {
        return false;
    };
    let Ok(salt) = URL_SAFE_NO_PAD.decode(salt_b64) else {
        return false;
    };

    let expected = URL_SAFE_NO_PAD.encode(digest(&salt, secret));
    constant_time_eq(expected.as_bytes(), mac_b64.as_bytes())
}

fn digest(salt: &[u8], secret: &str) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(salt).expect("HMAC can take key of any size");
    mac.update(secret.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// Constant-time comparison to prevent timing attacks
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
