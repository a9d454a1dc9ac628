//! AES-256-GCM sealing for secure frames
//!
//! Every frame is sealed under a fresh random 96-bit nonce. The nonce is
//! transmitted in clear in front of the ciphertext:
//!
//! ```text
//! nonce (12 bytes) || AES-256-GCM(plaintext) || tag (16 bytes)
//! ```
//!
//! No associated data is authenticated.

use std::fmt;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::CryptoError;

/// Size of the pre-shared symmetric key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of the per-frame nonce in bytes
pub const NONCE_SIZE: usize = 12;

/// Size of the GCM authentication tag in bytes
pub const TAG_SIZE: usize = 16;

/// A 256-bit pre-shared key
#[derive(Clone, PartialEq, Eq)]
pub struct SharedKey([u8; KEY_SIZE]);

impl SharedKey {
    /// Build a key from raw bytes, which must be exactly [`KEY_SIZE`] long
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; KEY_SIZE] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: KEY_SIZE,
                    actual: bytes.len(),
                })?;
        Ok(Self(key))
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedKey(..)")
    }
}

/// Seals and opens frame bodies under one shared key
#[derive(Clone)]
pub struct Cipher {
    aead: Aes256Gcm,
}

impl Cipher {
    /// Create a cipher for the given key
    pub fn new(key: &SharedKey) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
        Self {
            aead: Aes256Gcm::new(key),
        }
    }

    /// Create a cipher from raw key material
    pub fn from_slice(key: &[u8]) -> Result<Self, CryptoError> {
        SharedKey::from_bytes(key).map(|k| Self::new(&k))
    }

    /// Seal `plaintext`, returning `nonce || ciphertext || tag`
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng
            .try_fill_bytes(&mut nonce)
            .map_err(|_| CryptoError::RandomSource)?;

        let sealed = self
            .aead
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::Seal)?;

        let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Open a `nonce || ciphertext || tag` body
    ///
    /// Corruption and a wrong key both surface as
    /// [`CryptoError::Authentication`].
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < NONCE_SIZE {
            return Err(CryptoError::Authentication);
        }
        let (nonce, body) = sealed.split_at(NONCE_SIZE);
        self.aead
            .decrypt(Nonce::from_slice(nonce), body)
            .map_err(|_| CryptoError::Authentication)
    }
}

impl fmt::Debug for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cipher").finish_non_exhaustive()
    }
}
