//! Rollback cache for a device's pre-rotation client secret.
//!
//! The secret is written (encrypted) before regeneration, read back during
//! timeout rollback, and cleared once a rotation is confirmed or rolled back.

use std::sync::Arc;

use tracing::{debug, instrument};
use zeroize::Zeroizing;

use crate::domain::{Device, DeviceId};
use crate::errors::{CredplaneError, Result};
use crate::services::secret_encryption::SecretCipher;
use crate::storage::DeviceRepository;

#[derive(Clone)]
pub struct SecretCache {
    devices: Arc<dyn DeviceRepository>,
    cipher: Arc<dyn SecretCipher>,
}

impl SecretCache {
    pub fn new(devices: Arc<dyn DeviceRepository>, cipher: Arc<dyn SecretCipher>) -> Self {
        Self { devices, cipher }
    }

    /// Encrypt and persist `plaintext` on the device record.
    #[instrument(skip(self, plaintext), fields(device_id = %device_id))]
    pub async fn cache(&self, device_id: &DeviceId, plaintext: &str) -> Result<()> {
        let ciphertext = self.cipher.encrypt(plaintext.as_bytes())?;
        self.devices.store_cached_secret(device_id, &ciphertext).await?;
        debug!("Cached pre-rotation secret");
        Ok(())
    }

    /// Decrypt the secret carried on `device`, if any.
    pub fn get(&self, device: &Device) -> Result<Option<Zeroizing<String>>> {
        let Some(ciphertext) = device.cached_secret.as_deref() else {
            return Ok(None);
        };

        let plaintext = Zeroizing::new(self.cipher.decrypt(ciphertext)?);
        let secret = std::str::from_utf8(&plaintext).map_err(|_| {
            CredplaneError::internal(format!("Cached secret for device {} is not UTF-8", device.id))
        })?;
        Ok(Some(Zeroizing::new(secret.to_string())))
    }

    #[instrument(skip(self), fields(device_id = %device_id))]
    pub async fn clear(&self, device_id: &DeviceId) -> Result<()> {
        self.devices.clear_cached_secret(device_id).await
    }
}

impl std::fmt::Debug for SecretCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCache").finish_non_exhaustive()
    }
}
