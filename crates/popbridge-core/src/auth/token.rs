//! Signed bearer tokens passed as the POP3 password
//!
//! Tokens are compact HS256 JWTs: `base64url(header).base64url(claims).
//! base64url(signature)`, signed with the shared `token_secret`.

use super::CredentialVerifier;
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use popbridge_common::{Error, Result};
use popbridge_storage::{Store, StoreProvider};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Serialize, Deserialize)]
struct TokenHeader {
    alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    typ: Option<String>,
}

/// Claims carried by a mailbox token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Identity the token was issued to; must match `USER`
    pub sub: String,
    /// Expiry, in seconds since the Unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Store scope the token grants access to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

/// Accepts HS256 tokens whose subject is the declared identity
pub struct TokenVerifier {
    secret: Vec<u8>,
    provider: StoreProvider,
}

impl TokenVerifier {
    pub fn new(secret: &str, provider: StoreProvider) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            provider,
        }
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| Error::Config(format!("Invalid token secret: {}", e)))
    }

    /// Issue a token for the given claims
    pub fn issue(&self, claims: &TokenClaims) -> Result<String> {
        let header = TokenHeader {
            alg: "HS256".to_string(),
            typ: Some("JWT".to_string()),
        };
        let header = serde_json::to_vec(&header).map_err(|e| Error::Other(e.into()))?;
        let claims = serde_json::to_vec(claims).map_err(|e| Error::Other(e.into()))?;
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(claims)
        );

        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{}.{}", signing_input, signature))
    }

    /// Check the signature and expiry of a token and return its claims
    pub fn decode(&self, token: &str) -> Result<TokenClaims> {
        let invalid = |reason: &str| Error::Auth(format!("invalid token: {}", reason));

        let token = token.trim();
        let Some((signing_input, signature)) = token.rsplit_once('.') else {
            return Err(invalid("expected three segments"));
        };
        let Some((header, claims)) = signing_input.split_once('.') else {
            return Err(invalid("expected three segments"));
        };
        if claims.contains('.') {
            return Err(invalid("expected three segments"));
        }

        let header: TokenHeader = URL_SAFE_NO_PAD
            .decode(header)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .ok_or_else(|| invalid("malformed header"))?;
        if header.alg != "HS256" {
            return Err(invalid("unsupported algorithm"));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| invalid("malformed signature"))?;
        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| invalid("bad signature"))?;

        let claims: TokenClaims = URL_SAFE_NO_PAD
            .decode(claims)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .ok_or_else(|| invalid("malformed claims"))?;

        if let Some(exp) = claims.exp {
            if exp <= Utc::now().timestamp() {
                return Err(invalid("expired"));
            }
        }

        Ok(claims)
    }
}

#[async_trait]
impl CredentialVerifier for TokenVerifier {
    type Store = Store;

    async fn verify(&self, identity: &str, secret: &str) -> Result<Store> {
        let claims = self.decode(secret)?;
        if claims.sub != identity {
            return Err(Error::Auth(format!(
                "token subject does not match user {}",
                identity
            )));
        }

        debug!(user = %identity, prefix = ?claims.prefix, "Token accepted");
        self.provider.open(claims.prefix.as_deref()).await
    }
}
