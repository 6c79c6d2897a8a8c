//! Credential checks delegated to an HTTP service

use super::CredentialVerifier;
use async_trait::async_trait;
use popbridge_common::{Error, Result};
use popbridge_storage::{Store, StoreProvider};
use reqwest::{Client, Url};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))
}

fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| Error::Config(format!("Invalid auth.url {}: {}", url, e)))
}

#[derive(Serialize)]
struct AuthorizationRequest<'a> {
    name: &'a str,
    password: &'a str,
}

/// POSTs the credentials as JSON and accepts when the service answers `OK`.
///
/// The store is scoped to the identity.
pub struct RemoteVerifier {
    client: Client,
    url: Url,
    provider: StoreProvider,
}

impl RemoteVerifier {
    pub fn new(url: &str, timeout: Duration, provider: StoreProvider) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            url: parse_url(url)?,
            provider,
        })
    }
}

#[async_trait]
impl CredentialVerifier for RemoteVerifier {
    type Store = Store;

    async fn verify(&self, identity: &str, secret: &str) -> Result<Store> {
        let response = self
            .client
            .post(self.url.clone())
            .json(&AuthorizationRequest {
                name: identity,
                password: secret,
            })
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Authorization request failed");
                Error::Auth(format!("authorization service unavailable: {}", e))
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Error::Auth(format!(
                "authorization service returned {}",
                status
            )));
        }

        // the answer may be a JSON string or plain text
        let answer = serde_json::from_str::<String>(&body).unwrap_or_else(|_| body.trim().to_string());
        if answer != "OK" {
            return Err(Error::Auth(format!("access denied for {}", identity)));
        }

        debug!(user = %identity, "Remote authorization accepted");
        self.provider.open(Some(identity)).await
    }
}

/// GETs a URL with HTTP basic credentials; any 2xx answer accepts.
///
/// The store is scoped to the identity.
pub struct BasicAuthVerifier {
    client: Client,
    url: Url,
    provider: StoreProvider,
}

impl BasicAuthVerifier {
    pub fn new(url: &str, timeout: Duration, provider: StoreProvider) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            url: parse_url(url)?,
            provider,
        })
    }
}

#[async_trait]
impl CredentialVerifier for BasicAuthVerifier {
    type Store = Store;

    async fn verify(&self, identity: &str, secret: &str) -> Result<Store> {
        let response = self
            .client
            .get(self.url.clone())
            .basic_auth(identity, Some(secret))
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Basic auth lookup failed");
                Error::Auth(format!("authorization service unavailable: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(Error::Auth(format!(
                "basic auth rejected with {}",
                response.status()
            )));
        }

        debug!(user = %identity, "Basic auth accepted");
        self.provider.open(Some(identity)).await
    }
}
