//! HMAC-SHA256 JWTs for the HTTP and WebSocket surfaces.
//!
//! Compact JWS, HS256 only. The payload carries the username, user id,
//! admin flag, role list, and expiry; verification checks the signature in
//! constant time before trusting any claim, then the expiry.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::roles::Role;

type HmacSha256 = Hmac<Sha256>;

/// Default token lifetime: 12 hours.
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 12 * 60 * 60;

const HEADER_B64: &str = "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9"; // {"alg":"HS256","typ":"JWT"}

/// Token payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Username.
    pub sub: String,
    /// User id.
    pub uid: i64,
    pub is_admin: bool,
    pub roles: Vec<Role>,
    /// Expiry, UNIX seconds.
    pub exp: u64,
}

/// Token verification failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JwtError {
    #[error("malformed token")]
    Malformed,
    #[error("unsupported algorithm")]
    UnsupportedAlgorithm,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
}

/// Mints a signed token for `claims`.
///
/// # Panics
///
/// Never panics for non-empty secrets; HMAC accepts keys of any length.
#[must_use]
pub fn mint_token(secret: &[u8], claims: &Claims) -> String {
    let payload = serde_json::to_vec(claims).expect("claims serialize");
    let payload_b64 = URL_SAFE_NO_PAD.encode(payload);
    let signing_input = format!("{HEADER_B64}.{payload_b64}");
    let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(signing_input.as_bytes());
    let sig_b64 = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    format!("{signing_input}.{sig_b64}")
}

/// Verifies a token and returns its claims.
///
/// # Errors
///
/// Returns a [`JwtError`] for malformed tokens, wrong algorithms, bad
/// signatures, or expired tokens. `now_secs` is the caller's clock (UNIX
/// seconds) so verification is testable.
pub fn verify_token(secret: &[u8], token: &str, now_secs: u64) -> Result<Claims, JwtError> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(payload_b64), Some(sig_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(JwtError::Malformed);
    };

    let header = URL_SAFE_NO_PAD
        .decode(header_b64)
        .map_err(|_| JwtError::Malformed)?;
    let header: serde_json::Value =
        serde_json::from_slice(&header).map_err(|_| JwtError::Malformed)?;
    if header.get("alg").and_then(|a| a.as_str()) != Some("HS256") {
        return Err(JwtError::UnsupportedAlgorithm);
    }

    let signing_input = format!("{header_b64}.{payload_b64}");
    let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(signing_input.as_bytes());
    let expected = mac.finalize().into_bytes();
    let provided = URL_SAFE_NO_PAD
        .decode(sig_b64)
        .map_err(|_| JwtError::Malformed)?;
    if expected.as_slice().ct_eq(provided.as_slice()).unwrap_u8() != 1 {
        return Err(JwtError::InvalidSignature);
    }

    let payload = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| JwtError::Malformed)?;
    let claims: Claims = serde_json::from_slice(&payload).map_err(|_| JwtError::Malformed)?;
    if claims.exp <= now_secs {
        return Err(JwtError::Expired);
    }
    Ok(claims)
}
