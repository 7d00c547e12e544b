//! Keycloak-style admin API client for device OIDC clients.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};
use zeroize::Zeroizing;

use crate::config::IdentityProviderConfig;
use crate::errors::{CredplaneError, Result};

use super::token::AdminTokenCache;
use super::{IdentityProvider, SERVICE_NAME};

const MAX_ERROR_BODY: usize = 256;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientRepresentation {
    id: String,
    client_id: String,
}

#[derive(Deserialize)]
struct CredentialRepresentation {
    value: Option<String>,
}

#[derive(Debug)]
pub struct KeycloakAdminClient {
    http: reqwest::Client,
    admin_url: String,
    token: AdminTokenCache,
}

impl KeycloakAdminClient {
    pub fn new(config: &IdentityProviderConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| {
                CredplaneError::config(format!("Failed to build identity provider HTTP client: {}", e))
            })?;

        let base_url = config.base_url.trim_end_matches('/');
        Ok(Self {
            admin_url: format!("{}/admin/realms/{}", base_url, config.realm),
            token: AdminTokenCache::new(http.clone(), base_url, config),
            http,
        })
    }

    async fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let bearer = self.token.bearer().await?;
        Ok(self
            .http
            .request(method, format!("{}{}", self.admin_url, path))
            .bearer_auth(bearer.as_str()))
    }

    async fn send(&self, request: RequestBuilder, operation: &str) -> Result<Response> {
        let response = request.send().await.map_err(|e| {
            CredplaneError::external(SERVICE_NAME, format!("{} failed: {}", operation, e))
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::UNAUTHORIZED {
            self.token.invalidate().await;
        }

        let body = response.text().await.unwrap_or_default();
        let body = truncate_on_char_boundary(&body, MAX_ERROR_BODY);
        Err(CredplaneError::external(
            SERVICE_NAME,
            format!("{} returned {}: {}", operation, status, body),
        ))
    }

    async fn find_client(&self, client_id: &str) -> Result<Option<ClientRepresentation>> {
        let request = self.request(Method::GET, "/clients").await?.query(&[("clientId", client_id)]);
        let clients: Vec<ClientRepresentation> = self
            .send(request, "client lookup")
            .await?
            .json()
            .await
            .map_err(|e| malformed("client lookup", e))?;

        Ok(clients.into_iter().find(|c| c.client_id == client_id))
    }

    async fn require_client(&self, client_id: &str) -> Result<ClientRepresentation> {
        self.find_client(client_id)
            .await?
            .ok_or_else(|| CredplaneError::not_found("identity_provider_client", client_id))
    }

    async fn secret_call(
        &self,
        method: Method,
        client_id: &str,
        operation: &str,
    ) -> Result<Zeroizing<String>> {
        let client = self.require_client(client_id).await?;
        let request = self.request(method, &format!("/clients/{}/client-secret", client.id)).await?;
        let credential: CredentialRepresentation = self
            .send(request, operation)
            .await?
            .json()
            .await
            .map_err(|e| malformed(operation, e))?;

        credential.value.map(Zeroizing::new).ok_or_else(|| {
            CredplaneError::external(SERVICE_NAME, format!("{} returned no secret value", operation))
        })
    }
}

/// Longest prefix of `text` that fits in `max` bytes without splitting a character.
fn truncate_on_char_boundary(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    &text[..cut]
}

fn malformed(operation: &str, error: reqwest::Error) -> CredplaneError {
    CredplaneError::external(SERVICE_NAME, format!("malformed {} response: {}", operation, error))
}

#[async_trait]
impl IdentityProvider for KeycloakAdminClient {
    #[instrument(skip(self))]
    async fn create_client(&self, client_id: &str) -> Result<Zeroizing<String>> {
        if self.find_client(client_id).await?.is_some() {
            debug!("Client already exists, returning its current secret");
            return self.get_secret(client_id).await;
        }

        let body = json!({
            "clientId": client_id,
            "enabled": true,
            "publicClient": false,
            "serviceAccountsEnabled": true,
            "standardFlowEnabled": false,
            "clientAuthenticatorType": "client-secret",
        });
        let request = self.request(Method::POST, "/clients").await?.json(&body);

        if let Err(err) = self.send(request, "client create").await {
            // Lost a race with another creator; the client exists now.
            if self.find_client(client_id).await?.is_none() {
                return Err(err);
            }
            warn!(error = %err, "Client create failed but client exists, reusing it");
        } else {
            info!("Created identity provider client");
        }

        self.get_secret(client_id).await
    }

    #[instrument(skip(self))]
    async fn get_secret(&self, client_id: &str) -> Result<Zeroizing<String>> {
        self.secret_call(Method::GET, client_id, "get secret").await
    }

    #[instrument(skip(self))]
    async fn regenerate_secret(&self, client_id: &str) -> Result<Zeroizing<String>> {
        let secret = self.secret_call(Method::POST, client_id, "regenerate secret").await?;
        info!("Regenerated client secret");
        Ok(secret)
    }

    #[instrument(skip(self, secret))]
    async fn set_secret(&self, client_id: &str, secret: &str) -> Result<()> {
        let client = self.require_client(client_id).await?;
        let path = format!("/clients/{}", client.id);

        let request = self.request(Method::GET, &path).await?;
        let mut representation: Value = self
            .send(request, "client fetch")
            .await?
            .json()
            .await
            .map_err(|e| malformed("client fetch", e))?;

        let Some(fields) = representation.as_object_mut() else {
            return Err(CredplaneError::external(SERVICE_NAME, "client representation is not an object"));
        };
        fields.insert("secret".to_string(), Value::String(secret.to_string()));

        let request = self.request(Method::PUT, &path).await?.json(&representation);
        self.send(request, "client update").await?;
        info!("Restored explicit client secret");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn client_exists(&self, client_id: &str) -> Result<bool> {
        Ok(self.find_client(client_id).await?.is_some())
    }
}
