//! Directory-backed message store
//!
//! Every regular file in the directory is one message; the file name is
//! its unique id. Hidden files (leading `.`) are ignored so editors and
//! sync tools can leave temporaries next to the mail.

use crate::message::{Message, Payload, Snapshot};
use crate::store::MessageStore;
use async_trait::async_trait;
use popbridge_common::{Error, Exclusions, MessageNumber, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// Message store over a local directory
#[derive(Debug)]
pub struct FileStore {
    base_path: PathBuf,
    cache: Option<Snapshot>,
}

impl FileStore {
    /// Open a directory as a mailbox, creating it when missing
    pub async fn new(path: &Path) -> Result<Self> {
        fs::create_dir_all(path)
            .await
            .map_err(|e| Error::Storage(format!("Failed to create mail directory: {}", e)))?;

        info!(path = %path.display(), "Opened directory message store");

        Ok(Self {
            base_path: path.to_path_buf(),
            cache: None,
        })
    }

    /// Full path for a message id, with path traversal protection
    fn message_path(&self, id: &str) -> Result<PathBuf> {
        if id.contains("..") {
            return Err(Error::Storage(
                "Path traversal detected: '..' is not allowed".to_string(),
            ));
        }

        if id.starts_with('/') || id.starts_with('\\') || id.contains('/') {
            return Err(Error::Storage(
                "Message ids must be plain file names".to_string(),
            ));
        }

        Ok(self.base_path.join(id))
    }

    async fn scan(&self) -> Result<Snapshot> {
        let mut dir = fs::read_dir(&self.base_path)
            .await
            .map_err(|e| Error::Storage(format!("Failed to read mail directory: {}", e)))?;

        let mut entries = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| Error::Storage(format!("Failed to read mail directory: {}", e)))?
        {
            let Ok(name) = entry.file_name().into_string() else {
                debug!(path = %entry.path().display(), "Skipping non UTF-8 file name");
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            if !Message::is_valid_id(&name) {
                warn!(name = %name, "Skipping file whose name cannot be used as a message id");
                continue;
            }
            let metadata = entry
                .metadata()
                .await
                .map_err(|e| Error::Storage(format!("Failed to get file metadata: {}", e)))?;
            if metadata.is_file() {
                entries.push((name, metadata.len()));
            }
        }
        entries.sort();

        debug!(path = %self.base_path.display(), messages = entries.len(), "Scanned mail directory");

        Ok(entries
            .into_iter()
            .zip(1..)
            .map(|((id, size), number)| (number, Message::new(id, size)))
            .collect())
    }

    async fn cache(&mut self) -> Result<&mut Snapshot> {
        if self.cache.is_none() {
            self.cache = Some(self.scan().await?);
        }
        Ok(self.cache.get_or_insert_with(Snapshot::new))
    }
}

#[async_trait]
impl MessageStore for FileStore {
    async fn list(&mut self, excluded: &Exclusions) -> Result<Snapshot> {
        Ok(self
            .cache()
            .await?
            .iter()
            .filter(|(number, _)| !excluded.contains(number))
            .map(|(number, message)| (*number, message.clone()))
            .collect())
    }

    async fn payload(&mut self, number: MessageNumber, excluded: &Exclusions) -> Result<Payload> {
        if excluded.contains(&number) {
            return Err(Error::NoSuchMessage(number));
        }
        let id = match self.cache().await?.get(&number) {
            Some(Message {
                payload: Some(payload),
                ..
            }) => return Ok(payload.clone()),
            Some(message) => message.id.clone(),
            None => return Err(Error::NoSuchMessage(number)),
        };

        let path = self.message_path(&id)?;
        let data = fs::read(&path)
            .await
            .map_err(|e| Error::Storage(format!("Failed to read message {}: {}", id, e)))?;

        debug!(id = %id, size = data.len(), "Read message file");

        let payload = Payload::from(data);
        if let Some(message) = self.cache().await?.get_mut(&number) {
            message.payload = Some(payload.clone());
        }
        Ok(payload)
    }

    async fn delete(&mut self, number: MessageNumber) -> Result<()> {
        let id = self
            .cache()
            .await?
            .get(&number)
            .map(|message| message.id.clone())
            .ok_or(Error::NoSuchMessage(number))?;

        let path = self.message_path(&id)?;
        fs::remove_file(&path)
            .await
            .map_err(|e| Error::Storage(format!("Failed to delete message {}: {}", id, e)))?;

        debug!(id = %id, "Deleted message file");

        Ok(())
    }
}
