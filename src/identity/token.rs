//! Admin bearer token acquisition for the identity provider.
//!
//! Tokens come from a client-credentials grant against the admin realm and
//! are cached until `expires_at - buffer`, so a refresh happens before the
//! provider would reject the token. Concurrent callers share one refresh
//! because the cache lock is held across the token request.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, instrument};
use zeroize::Zeroizing;

use crate::config::IdentityProviderConfig;
use crate::errors::{CredplaneError, Result};

use super::SERVICE_NAME;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    60
}

/// Upper bound on a provider-reported token lifetime.
const MAX_TOKEN_LIFETIME_SECS: i64 = 86_400;

struct CachedToken {
    access_token: Zeroizing<String>,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
        now + buffer < self.expires_at
    }
}

pub struct AdminTokenCache {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: Zeroizing<String>,
    expiry_buffer: Duration,
    cached: Mutex<Option<CachedToken>>,
}

impl AdminTokenCache {
    pub fn new(http: reqwest::Client, base_url: &str, config: &IdentityProviderConfig) -> Self {
        Self {
            http,
            token_url: format!(
                "{}/realms/{}/protocol/openid-connect/token",
                base_url, config.admin_realm
            ),
            client_id: config.admin_client_id.clone(),
            client_secret: Zeroizing::new(config.admin_client_secret.clone()),
            expiry_buffer: config.token_expiry_buffer(),
            cached: Mutex::new(None),
        }
    }

    /// Return a bearer token valid for at least the configured buffer.
    pub async fn bearer(&self) -> Result<Zeroizing<String>> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now();

        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(now, self.expiry_buffer)) {
            return Ok(token.access_token.clone());
        }

        let token = self.request_token().await?;
        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }

    /// Drop the cached token so the next call fetches a new one.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    #[instrument(skip(self), fields(client_id = %self.client_id))]
    async fn request_token(&self) -> Result<CachedToken> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| {
                CredplaneError::external(SERVICE_NAME, format!("admin token request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CredplaneError::external(
                SERVICE_NAME,
                format!("admin token request returned {}", status),
            ));
        }

        let body: TokenResponse = response.json().await.map_err(|e| {
            CredplaneError::external(SERVICE_NAME, format!("malformed admin token response: {}", e))
        })?;

        debug!(expires_in = body.expires_in, "Acquired identity provider admin token");

        Ok(CachedToken {
            access_token: Zeroizing::new(body.access_token),
            expires_at: Utc::now()
                + Duration::seconds(body.expires_in.clamp(0, MAX_TOKEN_LIFETIME_SECS)),
        })
    }
}

impl std::fmt::Debug for AdminTokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminTokenCache")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}
