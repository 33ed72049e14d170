//! Bearer-token authentication for the control socket.
//!
//! Configuration stores SHA-256 hex digests, never the tokens themselves.
//! A digest can be produced with `missivectl system hash-token <token>` or
//! `echo -n "<token>" | sha256sum`.

use serde::Deserialize;
use sha2::{Digest, Sha256};

/// ```ron
/// auth: (
///     enabled: true,
///     token_hashes: ["4c5dc9b7708905f77f5e5d16316b5dfb425e68cb326dcd55a860e90a7707031e"],
/// )
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ControlAuthConfig {
    /// When disabled the socket's filesystem permissions are the only guard.
    #[serde(default)]
    pub enabled: bool,

    /// Lowercase hex SHA-256 digests of accepted tokens
    #[serde(default)]
    pub token_hashes: Vec<String>,
}

/// Lowercase hex SHA-256 digest of `token`.
#[must_use]
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

impl ControlAuthConfig {
    #[must_use]
    pub const fn requires_auth(&self) -> bool {
        self.enabled
    }

    /// `true` when auth is disabled or the token's digest is configured.
    #[must_use]
    pub fn validate_token(&self, token: &str) -> bool {
        if !self.enabled {
            return true;
        }

        let hash = hash_token(token);
        self.token_hashes
            .iter()
            .any(|configured| configured.trim().eq_ignore_ascii_case(&hash))
    }

    /// Check the token a request carried.
    ///
    /// # Errors
    ///
    /// A description of the failure when auth is enabled and the token is
    /// missing or unknown.
    pub fn authorise(&self, token: Option<&str>) -> Result<(), String> {
        if !self.enabled {
            return Ok(());
        }

        match token {
            None => Err("authentication required but no token provided".to_string()),
            Some(token) if self.validate_token(token) => Ok(()),
            Some(_) => Err("invalid authentication token".to_string()),
        }
    }
}
