//! popbridge Core - POP3 server over pluggable message stores
//!
//! This crate provides the POP3 session engine, the connection acceptor
//! (plain TCP or TLS) and the credential verifiers that open a message
//! store for each authenticated session.

pub mod auth;
pub mod pop3;
pub mod tls;

pub use auth::{CredentialVerifier, Verifier};
pub use pop3::{Pop3Config, Pop3Server};
pub use tls::create_tls_acceptor;
