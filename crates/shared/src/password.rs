//! Password hashing for migrated accounts.
//!
//! Target accounts store Argon2id hashes in PHC format. Legacy sources may
//! carry hashes produced by other schemes; those are carried over verbatim
//! only when they are recognisable PHC/modular-crypt strings.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use thiserror::Error;

use crate::crypto::generate_password;

/// Error type for password operations.
#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("Failed to hash password: {0}")]
    HashError(String),

    #[error("Failed to verify password: {0}")]
    VerifyError(String),

    #[error("Invalid password hash format")]
    InvalidHashFormat,
}

/// Argon2id parameters (OWASP 2024): 19 MiB memory, 2 iterations, 1 lane.
const MEMORY_COST: u32 = 19456;
const TIME_COST: u32 = 2;
const PARALLELISM: u32 = 1;
const OUTPUT_LEN: usize = 32;

/// Hash prefixes of schemes the target instance can still verify.
const CARRYABLE_PREFIXES: [&str; 5] = ["$argon2id$", "$argon2i$", "$2a$", "$2b$", "$2y$"];

/// A freshly generated credential.
///
/// `plaintext` must only ever reach the transient job result; `hash` is what
/// gets persisted.
#[derive(Clone)]
pub struct GeneratedCredential {
    pub plaintext: String,
    pub hash: String,
}

impl std::fmt::Debug for GeneratedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedCredential")
            .field("plaintext", &"<redacted>")
            .field("hash", &self.hash)
            .finish()
    }
}

fn create_argon2() -> Result<Argon2<'static>, PasswordError> {
    let params = Params::new(MEMORY_COST, TIME_COST, PARALLELISM, Some(OUTPUT_LEN))
        .map_err(|e| PasswordError::HashError(format!("Failed to create Argon2 params: {}", e)))?;

    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Hashes a password using Argon2id and returns a PHC-formatted string.
///
/// # Example
/// ```
/// use shared::password::hash_password;
///
/// let hash = hash_password("my_secure_password").unwrap();
/// assert!(hash.starts_with("$argon2id$"));
/// ```
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = create_argon2()?;

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PasswordError::HashError(e.to_string()))
}

/// Verifies a password against a stored Argon2 hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, PasswordError> {
    let parsed_hash = PasswordHash::new(hash).map_err(|_| PasswordError::InvalidHashFormat)?;

    // Parameters come from the hash itself.
    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(PasswordError::VerifyError(e.to_string())),
    }
}

/// Generates a random password and its Argon2id hash.
pub fn generate_credential() -> Result<GeneratedCredential, PasswordError> {
    let plaintext = generate_password();
    let hash = hash_password(&plaintext)?;
    Ok(GeneratedCredential { plaintext, hash })
}

/// Returns true when a source hash can be stored on the target unchanged.
pub fn is_carryable_hash(hash: &str) -> bool {
    CARRYABLE_PREFIXES.iter().any(|prefix| hash.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_password_returns_phc_format() {
        let hash = hash_password("test_password").unwrap();
        assert!(hash.starts_with("$argon2id$v=19$m=19456,t=2,p=1$"));
    }

    #[test]
    fn test_hash_password_produces_unique_hashes() {
        let hash1 = hash_password("same_password").unwrap();
        let hash2 = hash_password("same_password").unwrap();
        assert_ne!(hash1, hash2);
    }

    #[test]
    fn test_verify_password_roundtrip() {
        let hash = hash_password("correct horse").unwrap();
        assert!(verify_password("correct horse", &hash).unwrap());
        assert!(!verify_password("battery staple", &hash).unwrap());
    }

    #[test]
    fn test_verify_password_invalid_hash() {
        let result = verify_password("password", "invalid_hash_format");
        assert!(matches!(result, Err(PasswordError::InvalidHashFormat)));
    }

    #[test]
    fn test_generate_credential_hash_matches_plaintext() {
        let credential = generate_credential().unwrap();
        assert!(!credential.hash.contains(&credential.plaintext));
        assert!(verify_password(&credential.plaintext, &credential.hash).unwrap());
    }

    #[test]
    fn test_generated_credential_debug_redacts_plaintext() {
        let credential = generate_credential().unwrap();
        let debug = format!("{:?}", credential);
        assert!(!debug.contains(&credential.plaintext));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_is_carryable_hash() {
        assert!(is_carryable_hash("$argon2id$v=19$m=19456,t=2,p=1$abc$def"));
        assert!(is_carryable_hash(
            "$2a$10$N9qo8uLOickgx2ZMRZoMyeIjZAgcfl7p92ldGxad68LJZdL17lhWy"
        ));
        assert!(!is_carryable_hash("5f4dcc3b5aa765d61d8327deb882cf99"));
        assert!(!is_carryable_hash(""));
    }

    #[test]
    fn test_password_error_display() {
        let err = PasswordError::HashError("test error".to_string());
        assert!(format!("{}", err).contains("test error"));
    }
}
