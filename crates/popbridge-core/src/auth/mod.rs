//! Credential verification
//!
//! A verifier turns the identity given with `USER` and the secret given
//! with `PASS` into a message store for the session, or rejects them.

mod fixed;
mod remote;
mod token;

pub use fixed::StaticVerifier;
pub use remote::{BasicAuthVerifier, RemoteVerifier};
pub use token::{TokenClaims, TokenVerifier};

use async_trait::async_trait;
use popbridge_common::config::{AuthConfig, AuthStrategy};
use popbridge_common::{Error, Result};
use popbridge_storage::{MessageStore, Store, StoreProvider};
use std::time::Duration;

/// Checks credentials and opens the mailbox they grant access to
#[async_trait]
pub trait CredentialVerifier: Send + Sync + 'static {
    type Store: MessageStore;

    /// Verify `(identity, secret)` and open a fresh store for the session
    async fn verify(&self, identity: &str, secret: &str) -> Result<Self::Store>;
}

/// The verification strategies popbridge ships with
pub enum Verifier {
    Static(StaticVerifier),
    Token(TokenVerifier),
    Remote(RemoteVerifier),
    Basic(BasicAuthVerifier),
}

impl Verifier {
    /// Build the configured strategy over a store provider
    pub fn from_config(config: &AuthConfig, provider: StoreProvider) -> Result<Self> {
        let timeout = Duration::from_millis(config.timeout_ms);
        let url = || {
            config
                .url
                .clone()
                .ok_or_else(|| Error::Config("auth.url is required for this strategy".to_string()))
        };

        Ok(match config.strategy {
            AuthStrategy::Static => Verifier::Static(StaticVerifier::new(
                &config.user,
                &config.password,
                provider,
                config.scope_by_user,
            )),
            AuthStrategy::Token => {
                let secret = config.token_secret.as_deref().ok_or_else(|| {
                    Error::Config("auth.token_secret is required for the token strategy".to_string())
                })?;
                Verifier::Token(TokenVerifier::new(secret, provider))
            }
            AuthStrategy::Remote => Verifier::Remote(RemoteVerifier::new(&url()?, timeout, provider)?),
            AuthStrategy::Basic => {
                Verifier::Basic(BasicAuthVerifier::new(&url()?, timeout, provider)?)
            }
        })
    }

    /// Short name of the active strategy, for logs
    pub fn name(&self) -> &'static str {
        match self {
            Verifier::Static(_) => "static",
            Verifier::Token(_) => "token",
            Verifier::Remote(_) => "remote",
            Verifier::Basic(_) => "basic",
        }
    }
}

#[async_trait]
impl CredentialVerifier for Verifier {
    type Store = Store;

    async fn verify(&self, identity: &str, secret: &str) -> Result<Store> {
        match self {
            Verifier::Static(verifier) => verifier.verify(identity, secret).await,
            Verifier::Token(verifier) => verifier.verify(identity, secret).await,
            Verifier::Remote(verifier) => verifier.verify(identity, secret).await,
            Verifier::Basic(verifier) => verifier.verify(identity, secret).await,
        }
    }
}

/// Compare two secrets without an early exit on the first difference
pub(crate) fn secrets_match(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
