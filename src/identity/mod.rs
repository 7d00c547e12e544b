//! # Identity Provider Client
//!
//! Surface of the external client-credential admin API used by rotation.
//! Transport failures, non-success responses and malformed payloads all
//! surface as [`CredplaneError::ExternalService`](crate::errors::CredplaneError).
//! A missing client surfaces as `NotFound`.

pub mod client;
pub mod token;

use async_trait::async_trait;
use zeroize::Zeroizing;

use crate::errors::Result;

pub use client::KeycloakAdminClient;
pub use token::AdminTokenCache;

pub(crate) const SERVICE_NAME: &str = "identity_provider";

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Create the client if missing and return its secret. Never duplicates.
    async fn create_client(&self, client_id: &str) -> Result<Zeroizing<String>>;
    async fn get_secret(&self, client_id: &str) -> Result<Zeroizing<String>>;
    /// Invalidate the current secret and return the new one.
    async fn regenerate_secret(&self, client_id: &str) -> Result<Zeroizing<String>>;
    /// Set an explicit secret. Only used for rollback.
    async fn set_secret(&self, client_id: &str, secret: &str) -> Result<()>;
    async fn client_exists(&self, client_id: &str) -> Result<bool>;
}
