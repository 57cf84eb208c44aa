//! Key-wrapping service for data keys

use super::envelope::{self, KEY_LEN};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyWrapError {
    #[error("invalid key-encryption key: {0}")]
    InvalidKek(String),
    #[error("wrap failed: {0}")]
    Wrap(String),
    #[error("unwrap failed: {0}")]
    Unwrap(String),
}

/// Wraps and unwraps data keys under a durable master key.
///
/// The wrapped form is opaque to everything except the implementation.
#[async_trait]
pub trait KeyWrapper: Send + Sync {
    async fn wrap(&self, data_key: &[u8]) -> Result<Vec<u8>, KeyWrapError>;
    async fn unwrap(&self, wrapped: &[u8]) -> Result<Vec<u8>, KeyWrapError>;
}

/// Wraps keys locally with AES-256-GCM-SIV under a configured KEK
pub struct LocalKeyWrapper {
    kek: [u8; KEY_LEN],
}

impl LocalKeyWrapper {
    pub fn new(kek: [u8; KEY_LEN]) -> Self {
        Self { kek }
    }

    /// Parse a base64-encoded 32-byte KEK
    pub fn from_base64(encoded: &str) -> Result<Self, KeyWrapError> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| KeyWrapError::InvalidKek(e.to_string()))?;
        let kek: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| KeyWrapError::InvalidKek(format!("expected {KEY_LEN} bytes, got {}", b.len())))?;
        Ok(Self::new(kek))
    }

    /// Development fallback: KEK = SHA-256(secret)
    pub fn derive_from_secret(secret: &str) -> Self {
        Self::new(Sha256::digest(secret.as_bytes()).into())
    }
}

impl std::fmt::Debug for LocalKeyWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKeyWrapper").finish_non_exhaustive()
    }
}

#[async_trait]
impl KeyWrapper for LocalKeyWrapper {
    async fn wrap(&self, data_key: &[u8]) -> Result<Vec<u8>, KeyWrapError> {
        if data_key.len() != KEY_LEN {
            return Err(KeyWrapError::Wrap(format!(
                "data key must be {KEY_LEN} bytes"
            )));
        }
        envelope::seal(&self.kek, data_key).map_err(|e| KeyWrapError::Wrap(e.to_string()))
    }

    async fn unwrap(&self, wrapped: &[u8]) -> Result<Vec<u8>, KeyWrapError> {
        envelope::open(&self.kek, wrapped).map_err(|e| KeyWrapError::Unwrap(e.to_string()))
    }
}
