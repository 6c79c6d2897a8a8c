//! popbridge Common - Shared types and configuration
//!
//! This crate provides the configuration model, error type and the
//! message numbering types shared by the storage backends and the
//! POP3 server.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::{Exclusions, MessageNumber};
