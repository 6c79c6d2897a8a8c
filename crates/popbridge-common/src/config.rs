//! Configuration for popbridge
//!
//! Values are read from the first configuration file found in the default
//! locations (if any) and then overridden by `POPBRIDGE__*` environment
//! variables, e.g. `POPBRIDGE__SERVER__PORT=3110` or
//! `POPBRIDGE__STORAGE__S3__BUCKET=mail`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Password that ships as the default and must be changed in production
pub const DEFAULT_PASSWORD: &str = "changeit";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Listener configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// TLS configuration; plain TCP when absent
    pub tls: Option<TlsConfig>,

    /// Credential verification
    #[serde(default)]
    pub auth: AuthConfig,

    /// Message store backend
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind host
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port; 110 for plain TCP and 995 for TLS when unset
    pub port: Option<u16>,

    /// Name announced in the greeting
    #[serde(default = "default_server_name")]
    pub server_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: None,
            server_name: default_server_name(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_server_name() -> String {
    "popbridge".to_string()
}

/// TLS configuration
///
/// Certificate and key are given either as file paths or inline as PEM.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Path to certificate chain file
    pub cert_path: Option<PathBuf>,

    /// Path to private key file
    pub key_path: Option<PathBuf>,

    /// Inline PEM certificate chain
    pub cert: Option<String>,

    /// Inline PEM private key
    pub key: Option<String>,
}

impl TlsConfig {
    /// Whether a complete certificate/key pair is configured
    pub fn is_complete(&self) -> bool {
        (self.cert.is_some() && self.key.is_some())
            || (self.cert_path.is_some() && self.key_path.is_some())
    }
}

/// Credential verification strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthStrategy {
    /// Fixed user/password pair
    #[default]
    Static,
    /// HMAC-signed bearer token passed as the password
    Token,
    /// Delegated check against an HTTP endpoint
    Remote,
    /// HTTP basic-auth lookup
    Basic,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Verification strategy
    #[serde(default)]
    pub strategy: AuthStrategy,

    /// User name for the static strategy
    #[serde(default = "default_user")]
    pub user: String,

    /// Password for the static strategy
    #[serde(default = "default_password")]
    pub password: String,

    /// Shared signing secret for the token strategy
    pub token_secret: Option<String>,

    /// Endpoint for the remote and basic strategies
    pub url: Option<String>,

    /// HTTP timeout in milliseconds
    #[serde(default = "default_auth_timeout")]
    pub timeout_ms: u64,

    /// Scope the static user's store to a per-user prefix or directory
    #[serde(default)]
    pub scope_by_user: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            strategy: AuthStrategy::default(),
            user: default_user(),
            password: default_password(),
            token_secret: None,
            url: None,
            timeout_ms: default_auth_timeout(),
            scope_by_user: false,
        }
    }
}

fn default_user() -> String {
    "user".to_string()
}

fn default_password() -> String {
    DEFAULT_PASSWORD.to_string()
}

fn default_auth_timeout() -> u64 {
    5000
}

/// Message store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Always-empty mailbox
    None,
    /// In-memory mailbox seeded with a welcome message
    #[default]
    Demo,
    /// Directory of message files
    Fs,
    /// S3-compatible object storage
    S3,
}

/// Storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage backend
    #[serde(default)]
    pub backend: StorageBackend,

    /// Base directory for the fs backend
    pub path: Option<PathBuf>,

    /// S3 configuration
    pub s3: Option<S3Config>,
}

/// S3 configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct S3Config {
    /// Bucket name
    #[serde(default)]
    pub bucket: String,

    /// AWS region
    #[serde(default)]
    pub region: String,

    /// Key prefix the mailbox lives under
    #[serde(default)]
    pub prefix: String,

    /// Custom endpoint (MinIO, etc.); requests use path-style addressing
    pub endpoint: Option<String>,

    /// Access key ID, falls back to `AWS_ACCESS_KEY_ID`
    pub access_key_id: Option<String>,

    /// Secret access key, falls back to `AWS_SECRET_ACCESS_KEY`
    pub secret_access_key: Option<String>,

    /// Session token, falls back to `AWS_SESSION_TOKEN`
    pub session_token: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Default configuration file locations, in lookup order
    pub fn default_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from("./config.toml"),
            PathBuf::from("./config.yaml"),
            PathBuf::from("/etc/popbridge/config.toml"),
            PathBuf::from("/etc/popbridge/config.yaml"),
        ];
        if let Some(home) = std::env::var_os("HOME") {
            paths.push(PathBuf::from(home).join(".popbridge").join("config.toml"));
        }
        paths
    }

    /// Load configuration from the first existing default file and the
    /// environment. A missing file is not an error.
    pub fn load() -> crate::Result<Self> {
        let path = Self::default_paths().into_iter().find(|p| p.exists());
        Self::load_from(path.as_deref())
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        Self::load_from(Some(path))
    }

    /// Load configuration from an optional file overlaid with environment
    /// variables
    pub fn load_from(path: Option<&Path>) -> crate::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("POPBRIDGE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| crate::Error::Config(format!("Failed to load config: {}", e)))?;

        Ok(config)
    }

    /// Port to listen on, taking the TLS default into account
    pub fn listen_port(&self) -> u16 {
        self.server
            .port
            .unwrap_or(if self.tls.is_some() { 995 } else { 110 })
    }

    /// `host:port` the listener binds to
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.listen_port())
    }

    /// Check that every selected strategy has what it needs
    pub fn validate(&self) -> crate::Result<()> {
        if let Some(tls) = &self.tls {
            if !tls.is_complete() {
                return Err(crate::Error::Config(
                    "TLS needs cert/key or cert_path/key_path".to_string(),
                ));
            }
        }

        match self.storage.backend {
            StorageBackend::Fs if self.storage.path.is_none() => {
                return Err(crate::Error::Config(
                    "storage.path is required for the fs backend".to_string(),
                ));
            }
            StorageBackend::S3 => {
                let s3 = self.storage.s3.as_ref().ok_or_else(|| {
                    crate::Error::Config("storage.s3 is required for the s3 backend".to_string())
                })?;
                if s3.region.is_empty() {
                    return Err(crate::Error::Config("No storage.s3.region specified".to_string()));
                }
                if s3.bucket.is_empty() {
                    return Err(crate::Error::Config("No storage.s3.bucket specified".to_string()));
                }
            }
            _ => {}
        }

        match self.auth.strategy {
            AuthStrategy::Token if self.auth.token_secret.is_none() => Err(crate::Error::Config(
                "auth.token_secret is required for the token strategy".to_string(),
            )),
            AuthStrategy::Remote | AuthStrategy::Basic if self.auth.url.is_none() => Err(
                crate::Error::Config("auth.url is required for this strategy".to_string()),
            ),
            _ => Ok(()),
        }
    }

    /// Human-readable warnings about insecure settings
    pub fn warnings(&self) -> Vec<&'static str> {
        let mut warnings = Vec::new();
        if self.tls.is_none() {
            warnings.push("TLS is disabled");
        }
        if self.auth.strategy == AuthStrategy::Static && self.auth.password == DEFAULT_PASSWORD {
            warnings.push("The password is set to the default \"changeit\"");
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.host, "localhost");
        assert_eq!(config.listen_port(), 110);
        assert_eq!(config.auth.strategy, AuthStrategy::Static);
        assert_eq!(config.auth.user, "user");
        assert_eq!(config.storage.backend, StorageBackend::Demo);
        assert_eq!(
            config.warnings(),
            vec!["TLS is disabled", "The password is set to the default \"changeit\""]
        );
    }

    #[test]
    fn test_tls_default_port() {
        let config = Config {
            tls: Some(TlsConfig {
                cert_path: Some("/tmp/cert.pem".into()),
                key_path: Some("/tmp/key.pem".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(config.listen_port(), 995);
        assert_eq!(config.bind_address(), "localhost:995");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
host = "0.0.0.0"
port = 3110

[auth]
strategy = "static"
user = "alice"
password = "s3cret"

[storage]
backend = "s3"

[storage.s3]
bucket = "mail"
region = "eu-central-1"
prefix = "inbox/"
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.bind_address(), "0.0.0.0:3110");
        assert_eq!(config.auth.user, "alice");
        assert_eq!(config.storage.backend, StorageBackend::S3);
        let s3 = config.storage.s3.as_ref().unwrap();
        assert_eq!(s3.prefix, "inbox/");
        assert!(config.validate().is_ok());
        assert_eq!(config.warnings(), vec!["TLS is disabled"]);
    }

    #[test]
    fn test_validate_rejects_incomplete_backends() {
        let mut config = Config::default();
        config.storage.backend = StorageBackend::S3;
        assert!(config.validate().is_err());

        config.storage.s3 = Some(S3Config {
            bucket: "mail".to_string(),
            ..Default::default()
        });
        assert!(config.validate().is_err());

        config.storage.backend = StorageBackend::Fs;
        assert!(config.validate().is_err());
        config.storage.path = Some("/var/mail".into());
        assert!(config.validate().is_ok());

        config.auth.strategy = AuthStrategy::Token;
        assert!(config.validate().is_err());
        config.auth.token_secret = Some("k".to_string());
        assert!(config.validate().is_ok());

        config.auth.strategy = AuthStrategy::Remote;
        assert!(config.validate().is_err());

        config.auth.strategy = AuthStrategy::Static;
        config.tls = Some(TlsConfig {
            cert: Some("pem".to_string()),
            ..Default::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[server]\nport = 2110\nserver_name = \"mail.example.com\"\n\n[storage]\nbackend = \"none\""
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.listen_port(), 2110);
        assert_eq!(config.server.server_name, "mail.example.com");
        assert_eq!(config.storage.backend, StorageBackend::None);
        assert_eq!(config.auth.password, DEFAULT_PASSWORD);
    }

    #[test]
    fn test_load_from_missing_file() {
        assert!(Config::from_file(Path::new("/nonexistent/popbridge.toml")).is_err());
    }
}
