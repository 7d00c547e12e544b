//! Services layered over storage: secret encryption and the rollback cache.

pub mod secret_cache;
pub mod secret_encryption;

pub use secret_cache::SecretCache;
pub use secret_encryption::{AesGcmCipher, SecretCipher};
