//! Authentication primitives: password hashing and JWT issue/verify.

mod jwt;
mod password;

pub use jwt::{mint_token, verify_token, Claims, JwtError, DEFAULT_TOKEN_TTL_SECS};
pub use password::{
    hash_password, validate_password, verify_password, PasswordError, MAX_PASSWORD_LENGTH,
    MIN_PASSWORD_LENGTH,
};

/// Maximum accepted username length.
pub const MAX_USERNAME_LENGTH: usize = 64;

/// Validates a username: non-empty after trimming, bounded length, and
/// restricted to `[A-Za-z0-9_.\-]`.
///
/// # Errors
///
/// Returns a human-readable message suitable for a 400 response.
pub fn validate_username(username: &str) -> Result<(), String> {
    if username.is_empty() {
        return Err("Username is required".to_string());
    }
    if username.len() > MAX_USERNAME_LENGTH {
        return Err(format!(
            "Username must be at most {MAX_USERNAME_LENGTH} characters"
        ));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(
            "Username may only contain letters, numbers, underscores, dots, and hyphens"
                .to_string(),
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_charset() {
        assert!(validate_username("driver_1.a-b").is_ok());
        assert!(validate_username("").is_err());
        assert!(validate_username("nope nope").is_err());
        assert!(validate_username(&"x".repeat(65)).is_err());
    }
}
