//! Error types for popbridge

use crate::types::MessageNumber;
use thiserror::Error;

/// Main error type for popbridge
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Message {0} does not exist")]
    NoSuchMessage(MessageNumber),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for popbridge
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::Storage(_) => "STORAGE_ERROR",
            Error::NoSuchMessage(_) => "NO_SUCH_MESSAGE",
            Error::Auth(_) => "UNAUTHORIZED",
            Error::Tls(_) => "TLS_ERROR",
            Error::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the error means the message number did not resolve,
    /// as opposed to a backend failure
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NoSuchMessage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::NoSuchMessage(3).code(), "NO_SUCH_MESSAGE");
        assert_eq!(Error::Auth("nope".into()).code(), "UNAUTHORIZED");
        assert_eq!(Error::Tls("bad cert".into()).code(), "TLS_ERROR");
        assert_eq!(Error::Config("x".into()).code(), "CONFIG_ERROR");
        assert_eq!(Error::from(anyhow::anyhow!("boom")).code(), "INTERNAL_ERROR");
        assert_eq!(Error::NoSuchMessage(3).to_string(), "Message 3 does not exist");
        assert!(Error::NoSuchMessage(1).is_not_found());
        assert!(!Error::Storage("down".into()).is_not_found());
    }
}
