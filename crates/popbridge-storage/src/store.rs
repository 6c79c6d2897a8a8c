//! Message store abstraction

use crate::file::FileStore;
use crate::memory::{EmptyStore, MemoryMailbox, MemoryStore};
use crate::message::{Message, Payload, Snapshot};
use crate::s3::{S3Bucket, S3Store};
use async_trait::async_trait;
use popbridge_common::config::{StorageBackend, StorageConfig};
use popbridge_common::{Error, Exclusions, MessageNumber, Result};
use std::path::PathBuf;
use tracing::debug;

/// A mailbox as seen by one POP3 session.
///
/// Implementations assign message numbers on first use and must keep
/// them stable for the lifetime of the instance: number `n` always refers
/// to the same underlying message, and excluded numbers are left out of
/// results rather than renumbered. An instance is driven by a single
/// session and is never shared.
#[async_trait]
pub trait MessageStore: Send {
    /// List the visible messages
    async fn list(&mut self, excluded: &Exclusions) -> Result<Snapshot>;

    /// Look up one visible message
    async fn get(&mut self, number: MessageNumber, excluded: &Exclusions) -> Result<Message> {
        if excluded.contains(&number) {
            return Err(Error::NoSuchMessage(number));
        }
        self.list(excluded)
            .await?
            .remove(&number)
            .ok_or(Error::NoSuchMessage(number))
    }

    /// Fetch the raw payload of one visible message
    async fn payload(&mut self, number: MessageNumber, excluded: &Exclusions) -> Result<Payload>;

    /// Remove a message from the backing storage
    async fn delete(&mut self, number: MessageNumber) -> Result<()>;
}

/// The store backends popbridge ships with
pub enum Store {
    Empty(EmptyStore),
    Memory(MemoryStore),
    File(FileStore),
    S3(S3Store),
}

#[async_trait]
impl MessageStore for Store {
    async fn list(&mut self, excluded: &Exclusions) -> Result<Snapshot> {
        match self {
            Store::Empty(store) => store.list(excluded).await,
            Store::Memory(store) => store.list(excluded).await,
            Store::File(store) => store.list(excluded).await,
            Store::S3(store) => store.list(excluded).await,
        }
    }

    async fn get(&mut self, number: MessageNumber, excluded: &Exclusions) -> Result<Message> {
        match self {
            Store::Empty(store) => store.get(number, excluded).await,
            Store::Memory(store) => store.get(number, excluded).await,
            Store::File(store) => store.get(number, excluded).await,
            Store::S3(store) => store.get(number, excluded).await,
        }
    }

    async fn payload(&mut self, number: MessageNumber, excluded: &Exclusions) -> Result<Payload> {
        match self {
            Store::Empty(store) => store.payload(number, excluded).await,
            Store::Memory(store) => store.payload(number, excluded).await,
            Store::File(store) => store.payload(number, excluded).await,
            Store::S3(store) => store.payload(number, excluded).await,
        }
    }

    async fn delete(&mut self, number: MessageNumber) -> Result<()> {
        match self {
            Store::Empty(store) => store.delete(number).await,
            Store::Memory(store) => store.delete(number).await,
            Store::File(store) => store.delete(number).await,
            Store::S3(store) => store.delete(number).await,
        }
    }
}

/// Opens a fresh store for each authenticated session
#[derive(Clone)]
pub enum StoreProvider {
    Empty,
    Memory(MemoryMailbox),
    File(PathBuf),
    S3 { bucket: S3Bucket, prefix: String },
}

impl StoreProvider {
    /// Create a store provider from configuration
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        match config.backend {
            StorageBackend::None => Ok(StoreProvider::Empty),
            StorageBackend::Demo => Ok(StoreProvider::Memory(MemoryMailbox::demo())),
            StorageBackend::Fs => {
                let path = config.path.clone().ok_or_else(|| {
                    Error::Config("storage.path is required for the fs backend".to_string())
                })?;
                Ok(StoreProvider::File(path))
            }
            StorageBackend::S3 => {
                let s3 = config.s3.as_ref().ok_or_else(|| {
                    Error::Config("storage.s3 is required for the s3 backend".to_string())
                })?;
                Ok(StoreProvider::S3 {
                    bucket: S3Bucket::from_config(s3)?,
                    prefix: s3.prefix.clone(),
                })
            }
        }
    }

    /// Open a store, optionally narrowed to a per-user scope.
    ///
    /// The scope becomes a sub-directory for the file backend and a key
    /// sub-prefix for S3. The in-memory mailbox has no scopes.
    pub async fn open(&self, scope: Option<&str>) -> Result<Store> {
        if let Some(scope) = scope {
            validate_scope(scope)?;
        }
        debug!(scope = ?scope, "Opening message store");

        match self {
            StoreProvider::Empty => Ok(Store::Empty(EmptyStore)),
            StoreProvider::Memory(mailbox) => Ok(Store::Memory(MemoryStore::new(mailbox.clone()))),
            StoreProvider::File(base) => {
                let path = match scope {
                    Some(scope) => base.join(scope),
                    None => base.clone(),
                };
                Ok(Store::File(FileStore::new(&path).await?))
            }
            StoreProvider::S3 { bucket, prefix } => {
                let prefix = match scope {
                    Some(scope) => scoped_prefix(prefix, scope),
                    None => prefix.clone(),
                };
                Ok(Store::S3(S3Store::new(bucket.clone(), prefix)))
            }
        }
    }
}

/// Append a scope to a key prefix, inserting a separator when needed
pub fn scoped_prefix(prefix: &str, scope: &str) -> String {
    let mut scoped = prefix.to_string();
    if !scoped.is_empty() && !scoped.ends_with('/') {
        scoped.push('/');
    }
    scoped.push_str(scope);
    scoped.push('/');
    scoped
}

fn validate_scope(scope: &str) -> Result<()> {
    if scope.is_empty()
        || scope == "."
        || scope.contains("..")
        || scope.contains('/')
        || scope.contains('\\')
        || scope.chars().any(char::is_control)
    {
        return Err(Error::Storage(format!("Invalid store scope: {:?}", scope)));
    }
    Ok(())
}
