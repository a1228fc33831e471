//! Cryptographic utilities for content digests and generated secrets.

use rand::Rng;
use sha2::{Digest, Sha256};

/// Characters used for generated passwords.
const PASSWORD_CHARSET: &[u8] =
    b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz23456789!@#%^*-_";

/// Length of passwords generated for password-reset runs.
pub const GENERATED_PASSWORD_LENGTH: usize = 20;

/// Computes SHA-256 hash of the input and returns it as a hex string.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generates a random password suitable for handing to a migrated user.
///
/// Ambiguous glyphs (`0`, `O`, `1`, `l`, `I`) are left out of the alphabet.
pub fn generate_password() -> String {
    let mut rng = rand::thread_rng();
    (0..GENERATED_PASSWORD_LENGTH)
        .map(|_| {
            let idx = rng.gen_range(0..PASSWORD_CHARSET.len());
            PASSWORD_CHARSET[idx] as char
        })
        .collect()
}
