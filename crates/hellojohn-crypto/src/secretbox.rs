//! AES-256-GCM sealing for secrets at rest.
//!
//! # Purpose
//! Client secrets, DSNs and signing private keys are persisted only in sealed
//! form. [`SecretBox`] wraps a process-wide [`MasterKey`] that is loaded once
//! at boot and never mutated afterwards.
//!
//! # Format
//! `base64(nonce[12] || ciphertext || tag[16])`, standard alphabet with
//! padding. A fresh random nonce is drawn for every seal.
use crate::{CryptoError, CryptoResult};
use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::fmt;

const NONCE_LEN: usize = 12;

/// 32-byte AEAD key.
#[derive(Clone)]
pub struct MasterKey([u8; 32]);

impl MasterKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse a 64-character hex key (`SIGNING_MASTER_KEY`).
    pub fn from_hex(value: &str) -> CryptoResult<Self> {
        let bytes = hex::decode(value.trim())
            .map_err(|err| CryptoError::InvalidKey(format!("hex decode: {err}")))?;
        Self::from_slice(&bytes)
    }

    /// Parse a standard-base64 key (`SECRETBOX_MASTER_KEY`).
    pub fn from_base64(value: &str) -> CryptoResult<Self> {
        let bytes = STANDARD
            .decode(value.trim())
            .map_err(|err| CryptoError::InvalidKey(format!("base64 decode: {err}")))?;
        Self::from_slice(&bytes)
    }

    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey(format!("expected 32 bytes, got {}", bytes.len())))?;
        Ok(Self(key))
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey(**redacted**)")
    }
}

#[derive(Clone, Debug)]
pub struct SecretBox {
    key: MasterKey,
}

impl SecretBox {
    pub fn new(key: MasterKey) -> Self {
        Self { key }
    }

    pub fn seal(&self, plaintext: &[u8]) -> CryptoResult<String> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key.0));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| CryptoError::Seal)?;
        let mut combined = nonce_bytes.to_vec();
        combined.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(combined))
    }

    pub fn open(&self, sealed: &str) -> CryptoResult<Vec<u8>> {
        let combined = STANDARD
            .decode(sealed.trim())
            .map_err(|err| CryptoError::Encoding(err.to_string()))?;
        if combined.len() <= NONCE_LEN {
            return Err(CryptoError::Open);
        }
        let (nonce, ciphertext) = combined.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key.0));
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Open)
    }

    pub fn seal_str(&self, plaintext: &str) -> CryptoResult<String> {
        self.seal(plaintext.as_bytes())
    }

    pub fn open_str(&self, sealed: &str) -> CryptoResult<String> {
        let bytes = self.open(sealed)?;
        String::from_utf8(bytes).map_err(|err| CryptoError::Encoding(err.to_string()))
    }
}
