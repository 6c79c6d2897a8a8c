//! Fixed user/password pair

use super::{secrets_match, CredentialVerifier};
use async_trait::async_trait;
use popbridge_common::{Error, Result};
use popbridge_storage::{Store, StoreProvider};
use tracing::debug;

/// Accepts exactly one configured identity and password
pub struct StaticVerifier {
    user: String,
    password: String,
    provider: StoreProvider,
    scope_by_user: bool,
}

impl StaticVerifier {
    pub fn new(user: &str, password: &str, provider: StoreProvider, scope_by_user: bool) -> Self {
        Self {
            user: user.to_string(),
            password: password.to_string(),
            provider,
            scope_by_user,
        }
    }
}

#[async_trait]
impl CredentialVerifier for StaticVerifier {
    type Store = Store;

    async fn verify(&self, identity: &str, secret: &str) -> Result<Store> {
        // both checks always run
        let user_ok = secrets_match(identity.as_bytes(), self.user.as_bytes());
        let password_ok = secrets_match(secret.as_bytes(), self.password.as_bytes());
        if !(user_ok && password_ok) {
            return Err(Error::Auth("invalid user or password".to_string()));
        }

        debug!(user = %identity, "Static credentials accepted");
        let scope = self.scope_by_user.then_some(identity);
        self.provider.open(scope).await
    }
}
