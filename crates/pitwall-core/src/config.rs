//! Server configuration from the environment.
//!
//! The binary takes no positional arguments; everything operational comes
//! from env vars. `JWT_SECRET` is the only hard requirement; there is no
//! default signing key.

use std::time::Duration;

use crate::auth::DEFAULT_TOKEN_TTL_SECS;

/// Default HTTP listen port.
pub const DEFAULT_HTTP_PORT: u16 = 8000;

/// Configuration error: the process should exit with code 1.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("JWT_SECRET environment variable is required")]
    MissingJwtSecret,
    #[error("invalid {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Validated environment configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub jwt_secret: Vec<u8>,
    pub token_ttl: Duration,
    pub http_port: u16,
    pub allowed_origins: Vec<String>,
    /// Initial watch directory, used only when the store has none.
    pub ldx_watch_dir: Option<String>,
    /// Bootstrap admin credentials, used only when the user table is empty.
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
}

impl ServerConfig {
    /// Reads and validates the environment.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when `JWT_SECRET` is absent or a numeric
    /// variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let jwt_secret = std::env::var("JWT_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingJwtSecret)?
            .into_bytes();

        let http_port = match std::env::var("HTTP_PORT") {
            Ok(raw) => raw.parse::<u16>().map_err(|_| ConfigError::Invalid {
                name: "HTTP_PORT",
                value: raw,
            })?,
            Err(_) => DEFAULT_HTTP_PORT,
        };

        let token_ttl = match std::env::var("JWT_TTL_SECS") {
            Ok(raw) => Duration::from_secs(raw.parse::<u64>().map_err(|_| {
                ConfigError::Invalid {
                    name: "JWT_TTL_SECS",
                    value: raw,
                }
            })?),
            Err(_) => Duration::from_secs(DEFAULT_TOKEN_TTL_SECS),
        };

        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| {
                "http://localhost:8080,http://localhost:5173,http://localhost:3000".to_string()
            })
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            jwt_secret,
            token_ttl,
            http_port,
            allowed_origins,
            ldx_watch_dir: std::env::var("LDX_WATCH_DIR").ok().filter(|s| !s.is_empty()),
            admin_username: std::env::var("ADMIN_USERNAME").ok().filter(|s| !s.is_empty()),
            admin_password: std::env::var("ADMIN_PASSWORD").ok().filter(|s| !s.is_empty()),
        })
    }
}
