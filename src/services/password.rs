//! Password hashing and policy.
//!
//! Hashes are Argon2id PHC strings with a random per-password salt.

use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use rand::rngs::OsRng;
use thiserror::Error;

pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MAX_PASSWORD_LENGTH: usize = 128;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("{0}")]
    Policy(String),
    #[error("password hashing failed: {0}")]
    Hashing(String),
}

/// Check the length and content rules for a new password.
pub fn check_policy(plain: &str) -> Result<(), PasswordError> {
    if plain.trim().is_empty() {
        return Err(PasswordError::Policy(
            "password cannot be empty or whitespace only".to_string(),
        ));
    }
    let len = plain.chars().count();
    if len < MIN_PASSWORD_LENGTH {
        return Err(PasswordError::Policy(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    if len > MAX_PASSWORD_LENGTH {
        return Err(PasswordError::Policy(format!(
            "password must be at most {} characters",
            MAX_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

/// Validate `plain` against the policy and hash it.
pub fn hash_password(plain: &str) -> Result<String, PasswordError> {
    check_policy(plain)?;
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| PasswordError::Hashing(e.to_string()))
}

/// Constant-time verification. Malformed hashes never verify.
pub fn verify_password(plain: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy() {
        assert!(matches!(check_policy("short"), Err(PasswordError::Policy(_))));
        assert!(matches!(check_policy("          "), Err(PasswordError::Policy(_))));
        assert!(check_policy(&"a".repeat(MAX_PASSWORD_LENGTH + 1)).is_err());
        assert!(check_policy("correct horse").is_ok());
    }

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("S3cure-enough").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("S3cure-enough", &hash));
        assert!(!verify_password("wrong-password", &hash));
    }

    #[test]
    fn test_malformed_hash_does_not_verify() {
        assert!(!verify_password("anything", "not-a-phc-string"));
    }
}
