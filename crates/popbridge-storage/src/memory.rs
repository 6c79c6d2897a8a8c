//! In-memory message stores

use crate::message::{Message, Payload, Snapshot};
use crate::store::MessageStore;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Local;
use popbridge_common::{Error, Exclusions, MessageNumber, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// A mailbox that never holds any message
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyStore;

#[async_trait]
impl MessageStore for EmptyStore {
    async fn list(&mut self, _excluded: &Exclusions) -> Result<Snapshot> {
        Ok(Snapshot::new())
    }

    async fn get(&mut self, number: MessageNumber, _excluded: &Exclusions) -> Result<Message> {
        Err(Error::NoSuchMessage(number))
    }

    async fn payload(&mut self, number: MessageNumber, _excluded: &Exclusions) -> Result<Payload> {
        Err(Error::NoSuchMessage(number))
    }

    async fn delete(&mut self, number: MessageNumber) -> Result<()> {
        Err(Error::NoSuchMessage(number))
    }
}

/// Shared in-memory backing storage, keyed by message id.
///
/// Cloning yields another handle to the same messages.
#[derive(Debug, Clone, Default)]
pub struct MemoryMailbox {
    messages: Arc<Mutex<BTreeMap<String, Bytes>>>,
}

impl MemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mailbox holding a single welcome message
    pub fn demo() -> Self {
        let mailbox = Self::new();
        mailbox.insert(demo_message());
        mailbox
    }

    /// Store a message under the SHA-256 of its content and return the id
    pub fn insert(&self, payload: impl Into<Bytes>) -> String {
        let payload = payload.into();
        let id = hex::encode(Sha256::digest(&payload));
        self.insert_with_id(id.clone(), payload);
        id
    }

    /// Store a message under an explicit id
    pub fn insert_with_id(&self, id: impl Into<String>, payload: impl Into<Bytes>) {
        self.lock().insert(id.into(), payload.into());
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn fetch(&self, id: &str) -> Option<Bytes> {
        self.lock().get(id).cloned()
    }

    fn remove(&self, id: &str) -> bool {
        self.lock().remove(id).is_some()
    }

    fn entries(&self) -> Vec<(String, u64)> {
        self.lock()
            .iter()
            .map(|(id, payload)| (id.clone(), payload.len() as u64))
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Bytes>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn demo_message() -> String {
    format!(
        "Date: {}\r\n\
         To: recipient@example.com\r\n\
         From: popbridge <sender@example.com>\r\n\
         Subject: popbridge\r\n\
         \r\n\
         Hello,\r\n\
         \r\n\
         You received this message because you successfully set up popbridge.\r\n",
        Local::now().format("%a, %d %b %Y %H:%M:%S %z")
    )
}

/// Session view over a [`MemoryMailbox`].
///
/// The numbered listing is taken on first use and kept for the lifetime of
/// the store, so messages added or removed by other sessions afterwards do
/// not shift numbers.
#[derive(Debug)]
pub struct MemoryStore {
    mailbox: MemoryMailbox,
    cache: Option<Snapshot>,
}

impl MemoryStore {
    pub fn new(mailbox: MemoryMailbox) -> Self {
        Self {
            mailbox,
            cache: None,
        }
    }

    fn cache(&mut self) -> &mut Snapshot {
        let mailbox = &self.mailbox;
        self.cache.get_or_insert_with(|| {
            let snapshot: Snapshot = mailbox
                .entries()
                .into_iter()
                .zip(1..)
                .map(|((id, size), number)| (number, Message::new(id, size)))
                .collect();
            debug!(messages = snapshot.len(), "Loaded in-memory mailbox listing");
            snapshot
        })
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn list(&mut self, excluded: &Exclusions) -> Result<Snapshot> {
        Ok(self
            .cache()
            .iter()
            .filter(|(number, _)| !excluded.contains(number))
            .map(|(number, message)| (*number, message.clone()))
            .collect())
    }

    async fn payload(&mut self, number: MessageNumber, excluded: &Exclusions) -> Result<Payload> {
        if excluded.contains(&number) {
            return Err(Error::NoSuchMessage(number));
        }
        let mailbox = self.mailbox.clone();
        let message = self
            .cache()
            .get_mut(&number)
            .ok_or(Error::NoSuchMessage(number))?;

        if let Some(payload) = &message.payload {
            return Ok(payload.clone());
        }
        let bytes = mailbox.fetch(&message.id).ok_or_else(|| {
            Error::Storage(format!("message {} is no longer in the mailbox", message.id))
        })?;
        let payload = Payload::from(bytes);
        message.payload = Some(payload.clone());
        Ok(payload)
    }

    async fn delete(&mut self, number: MessageNumber) -> Result<()> {
        let mailbox = self.mailbox.clone();
        let message = self.cache().get(&number).ok_or(Error::NoSuchMessage(number))?;
        if !mailbox.remove(&message.id) {
            return Err(Error::Storage(format!(
                "message {} is no longer in the mailbox",
                message.id
            )));
        }
        debug!(id = %message.id, "Deleted message from in-memory mailbox");
        Ok(())
    }
}
