//! Secret encryption using AES-256-GCM
//!
//! Device client secrets cached for timeout restoration are encrypted at rest.
//! The 256-bit key is derived with HKDF-SHA256 from the configured
//! `secret_cache.master_secret`, and every encryption draws a fresh random
//! nonce. The stored form is `nonce || ciphertext || tag` in a single column.

use crate::config::SecretCacheConfig;
use crate::errors::{CredplaneError, Result};
use ring::aead::{self, Aad, BoundKey, Nonce, NonceSequence, UnboundKey, AES_256_GCM};
use ring::hkdf;
use ring::rand::{SecureRandom, SystemRandom};
use std::sync::Arc;
use tracing::{debug, error, instrument};
use zeroize::Zeroizing;

/// Size of AES-256-GCM nonce in bytes
const NONCE_SIZE: usize = 12;

/// Size of AES-256-GCM tag in bytes
const TAG_SIZE: usize = 16;

const KEY_SIZE: usize = 32;

const HKDF_SALT: &[u8] = b"credplane.secret-cache.v1";
const HKDF_INFO: &[u8] = b"device-client-secret";

/// Symmetric encryption used by the secret cache.
pub trait SecretCipher: Send + Sync {
    /// Encrypt `plaintext`, returning a self-contained blob.
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;
    /// Decrypt a blob produced by [`SecretCipher::encrypt`].
    fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>>;
}

/// Single-use nonce sequence for AES-GCM
struct SingleNonce {
    nonce: Option<[u8; NONCE_SIZE]>,
}

impl SingleNonce {
    fn new(nonce_bytes: [u8; NONCE_SIZE]) -> Self {
        Self { nonce: Some(nonce_bytes) }
    }
}

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> std::result::Result<Nonce, ring::error::Unspecified> {
        self.nonce.take().map(Nonce::assume_unique_for_key).ok_or(ring::error::Unspecified)
    }
}

/// AES-256-GCM cipher keyed from the process master secret
#[derive(Clone)]
pub struct AesGcmCipher {
    key_bytes: Arc<Zeroizing<[u8; KEY_SIZE]>>,
    rng: Arc<SystemRandom>,
}

impl AesGcmCipher {
    pub fn new(config: &SecretCacheConfig) -> Result<Self> {
        Self::from_master_secret(config.master_secret.as_bytes())
    }

    pub fn from_master_secret(master_secret: &[u8]) -> Result<Self> {
        if master_secret.len() < KEY_SIZE {
            return Err(CredplaneError::config(format!(
                "secret_cache.master_secret must be at least {} bytes, got {}",
                KEY_SIZE,
                master_secret.len()
            )));
        }

        let prk = hkdf::Salt::new(hkdf::HKDF_SHA256, HKDF_SALT).extract(master_secret);
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        prk.expand(&[HKDF_INFO], &AES_256_GCM)
            .and_then(|okm| okm.fill(&mut key[..]))
            .map_err(|_| CredplaneError::internal("Failed to derive secret cache key"))?;

        debug!("Secret cache cipher initialized");

        Ok(Self { key_bytes: Arc::new(key), rng: Arc::new(SystemRandom::new()) })
    }

    fn unbound_key(&self) -> Result<UnboundKey> {
        UnboundKey::new(&AES_256_GCM, &self.key_bytes[..]).map_err(|_| {
            error!("Failed to create secret cache key");
            CredplaneError::internal("Failed to create secret cache key")
        })
    }
}

impl SecretCipher for AesGcmCipher {
    #[instrument(skip(self, plaintext), fields(plaintext_len = plaintext.len()))]
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        self.rng.fill(&mut nonce_bytes).map_err(|_| {
            error!("Failed to generate random nonce");
            CredplaneError::internal("Failed to generate random nonce for encryption")
        })?;

        let mut sealing_key = aead::SealingKey::new(self.unbound_key()?, SingleNonce::new(nonce_bytes));

        let mut sealed = Vec::with_capacity(plaintext.len() + TAG_SIZE);
        sealed.extend_from_slice(plaintext);
        sealing_key.seal_in_place_append_tag(Aad::empty(), &mut sealed).map_err(|_| {
            error!("Encryption failed");
            CredplaneError::internal("Failed to encrypt secret data")
        })?;

        let mut blob = Vec::with_capacity(NONCE_SIZE + sealed.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&sealed);
        Ok(blob)
    }

    #[instrument(skip(self, blob), fields(blob_len = blob.len()))]
    fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>> {
        if blob.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CredplaneError::internal(
                "Cached secret too short (missing nonce or authentication tag)",
            ));
        }

        let (nonce, ciphertext) = blob.split_at(NONCE_SIZE);
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        nonce_bytes.copy_from_slice(nonce);

        let mut opening_key = aead::OpeningKey::new(self.unbound_key()?, SingleNonce::new(nonce_bytes));

        let mut buffer = ciphertext.to_vec();
        let plaintext = opening_key.open_in_place(Aad::empty(), &mut buffer).map_err(|_| {
            error!("Decryption failed - possible tampering or wrong key");
            CredplaneError::internal("Failed to decrypt secret data - authentication failed")
        })?;

        Ok(plaintext.to_vec())
    }
}

impl std::fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmCipher").field("key_bytes", &"[REDACTED]").finish()
    }
}
