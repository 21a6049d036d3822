//! Password hashing with salted, iterated HMAC-SHA256 (PBKDF2, single block).
//!
//! Stored format: `pbkdf2-sha256$<iterations>$<salt_hex>$<digest_hex>`.
//! The iteration count is embedded in the stored hash so it can be raised
//! later without invalidating existing credentials.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const SCHEME: &str = "pbkdf2-sha256";
const DEFAULT_ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;

/// One PBKDF2 block: derives a 32-byte key from `password` and `salt`.
fn derive(password: &[u8], salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(password).expect("HMAC accepts any key length");
    mac.update(salt);
    mac.update(&1u32.to_be_bytes());
    let mut u = mac.finalize().into_bytes();

    let mut dk = [0u8; 32];
    dk.copy_from_slice(&u);

    for _ in 1..iterations {
        let mut mac = HmacSha256::new_from_slice(password).expect("HMAC accepts any key length");
        mac.update(&u);
        u = mac.finalize().into_bytes();
        for (d, b) in dk.iter_mut().zip(u.iter()) {
            *d ^= b;
        }
    }

    dk
}

/// Hashes a password with a fresh random salt.
pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);

    let digest = derive(password.as_bytes(), &salt, DEFAULT_ITERATIONS);
    format!(
        "{SCHEME}${DEFAULT_ITERATIONS}${}${}",
        hex::encode(salt),
        hex::encode(digest)
    )
}

/// Verifies a password against a stored hash.
///
/// Returns `false` for malformed stored hashes rather than erroring; a
/// corrupt hash is indistinguishable from a wrong password to the caller.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let parts: Vec<&str> = stored.split('$').collect();
    if parts.len() != 4 || parts[0] != SCHEME {
        return false;
    }
    let Ok(iterations) = parts[1].parse::<u32>() else {
        return false;
    };
    if iterations == 0 {
        return false;
    }
    let Ok(salt) = hex::decode(parts[2]) else {
        return false;
    };
    let Ok(expected) = hex::decode(parts[3]) else {
        return false;
    };
    if expected.len() != 32 {
        return false;
    }

    let digest = derive(password.as_bytes(), &salt, iterations);

    // Constant-time comparison.
    let mut diff = 0u8;
    for (a, b) in digest.iter().zip(expected.iter()) {
        diff |= a ^ b;
    }
    diff == 0
}
