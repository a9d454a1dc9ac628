//! Pre-shared key and auth token
//!
//! Both are read from the environment, never from the config file.

use pv_protocol::{SecureContext, SharedKey, KEY_SIZE};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::ConfigError;

/// Environment variable holding the 32-byte shared key
pub const SHARED_KEY_ENV: &str = "SHARED_KEY";

/// Environment variable holding the auth token
pub const AUTH_TOKEN_ENV: &str = "AUTH_TOKEN";

/// Key used when `SHARED_KEY` is unset. Anyone can read it from the binary.
pub const DEFAULT_SHARED_KEY: &[u8; KEY_SIZE] = b"thisis32byteslongthisis32byteslo";

/// Raw key material and token, before validation
#[derive(Clone, Default)]
pub struct SecurityConfig {
    /// Shared key bytes; `None` falls back to [`DEFAULT_SHARED_KEY`]
    pub shared_key: Option<Vec<u8>>,
    /// Auth token; `None` behaves as the empty token
    pub auth_token: Option<String>,
}

impl SecurityConfig {
    /// Read `SHARED_KEY` and `AUTH_TOKEN`; empty values count as unset
    pub fn from_env() -> Self {
        let shared_key = std::env::var_os(SHARED_KEY_ENV)
            .filter(|v| !v.is_empty())
            .map(|v| v.into_encoded_bytes());
        let auth_token = std::env::var(AUTH_TOKEN_ENV).ok().filter(|v| !v.is_empty());
        Self {
            shared_key,
            auth_token,
        }
    }

    /// Build from explicit values
    pub fn new(shared_key: impl Into<Vec<u8>>, auth_token: Option<String>) -> Self {
        Self {
            shared_key: Some(shared_key.into()),
            auth_token,
        }
    }

    /// Validate the key, falling back to the default when none is set
    pub fn shared_key(&self) -> Result<SharedKey, ConfigError> {
        match &self.shared_key {
            Some(bytes) => key_from(bytes),
            None => {
                tracing::warn!(
                    "{} is not set, using the built-in default key; traffic is not confidential",
                    SHARED_KEY_ENV
                );
                key_from(DEFAULT_SHARED_KEY)
            }
        }
    }

    /// Validate and build the context shared by every session of a mirror
    pub fn resolve(&self) -> Result<SecureContext, ConfigError> {
        let key = self.shared_key()?;
        tracing::info!("Shared key fingerprint: {}", key_fingerprint(&key));
        if self.auth_token.is_none() {
            tracing::warn!("{} is not set, auth frames carry an empty token", AUTH_TOKEN_ENV);
        }
        Ok(SecureContext::new(&key, self.auth_token.clone()))
    }
}

impl fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("shared_key_set", &self.shared_key.is_some())
            .field("auth_token_set", &self.auth_token.is_some())
            .finish()
    }
}

fn key_from(bytes: &[u8]) -> Result<SharedKey, ConfigError> {
    SharedKey::from_bytes(bytes).map_err(|_| ConfigError::InvalidKeyLength {
        expected: KEY_SIZE,
        actual: bytes.len(),
    })
}

/// Short SHA-256 fingerprint of a key, safe to log
pub fn key_fingerprint(key: &SharedKey) -> String {
    let digest = Sha256::digest(key.as_bytes());
    hex::encode(&digest[..8])
}
