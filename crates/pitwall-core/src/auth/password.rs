//! Password hashing and the account password policy.
//!
//! Argon2id with a fresh random salt per user; hashes are stored in PHC
//! string format so parameters can be tightened later without invalidating
//! existing accounts.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;

/// Minimum accepted password length.
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Maximum accepted password length.
pub const MAX_PASSWORD_LENGTH: usize = 128;

/// Password hashing/verification failure.
#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error("stored password hash is malformed: {0}")]
    Malformed(String),
}

/// Checks a candidate password against the account policy.
///
/// # Errors
///
/// Returns a human-readable message suitable for a 400 response.
pub fn validate_password(password: &str) -> Result<(), String> {
    if password.trim().is_empty() {
        return Err("Password is required".to_string());
    }
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters"
        ));
    }
    if password.len() > MAX_PASSWORD_LENGTH {
        return Err(format!(
            "Password must be at most {MAX_PASSWORD_LENGTH} characters"
        ));
    }
    if password.chars().all(|c| c.is_ascii_digit()) {
        return Err("Password cannot be all numbers".to_string());
    }
    if password.chars().all(char::is_alphabetic) {
        return Err("Password must contain at least one number or special character".to_string());
    }
    let mut distinct: Vec<char> = password.chars().collect();
    distinct.sort_unstable();
    distinct.dedup();
    if distinct.len() < 3 {
        return Err("Password must contain at least 3 distinct characters".to_string());
    }
    Ok(())
}

/// Hashes a password with Argon2id and a fresh random salt.
///
/// # Errors
///
/// Returns [`PasswordError::Hash`] if the KDF fails.
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| PasswordError::Hash(e.to_string()))
}

/// Verifies a password against a stored PHC hash string.
///
/// The comparison inside argon2 is constant-time; a malformed stored hash
/// is reported as an error rather than a mismatch so corruption is visible.
///
/// # Errors
///
/// Returns [`PasswordError::Malformed`] if the stored hash does not parse.
pub fn verify_password(password: &str, stored: &str) -> Result<bool, PasswordError> {
    let parsed = PasswordHash::new(stored).map_err(|e| PasswordError::Malformed(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("pitlane42!").unwrap();
        assert!(verify_password("pitlane42!", &hash).unwrap());
        assert!(!verify_password("pitlane43!", &hash).unwrap());
    }

    #[test]
    fn test_salts_differ() {
        let a = hash_password("pitlane42!").unwrap();
        let b = hash_password("pitlane42!").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_malformed_hash_is_error() {
        assert!(matches!(
            verify_password("x", "not-a-phc-string"),
            Err(PasswordError::Malformed(_))
        ));
    }

    #[test]
    fn test_policy() {
        assert!(validate_password("pitlane42").is_ok());
        assert!(validate_password("").is_err());
        assert!(validate_password("short1").is_err());
        assert!(validate_password("12345678").is_err());
        assert!(validate_password("password").is_err());
        assert!(validate_password("aaaa1111").is_err());
        assert!(validate_password(&"a1".repeat(80)).is_err());
    }
}
