//! # Credplane
//!
//! Credential rotation for a fleet of embedded devices whose OIDC client
//! secrets live in an external identity provider.
//!
//! ```text
//! RotationJob ──▶ RotationEngine ──▶ IdentityProvider
//!                   │      ▲               (admin API)
//!        DeviceRepository  CompletionDetector ◀── device config fetch
//!        SecretCache       DeviceNotifier ──▶ publish bridge
//! ```
//!
//! Rotations are strictly serialised: at most one device is ever PENDING.
//! The device's previous secret is cached, encrypted, before regeneration
//! so a device that never confirms can be rolled back.

pub mod api;
pub mod config;
pub mod domain;
pub mod errors;
pub mod identity;
pub mod notification;
pub mod observability;
pub mod rotation;
pub mod services;
pub mod startup;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::AppConfig;
pub use errors::{CredplaneError, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
