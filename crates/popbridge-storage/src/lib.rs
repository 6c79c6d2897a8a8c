//! popbridge Storage - Message store backends
//!
//! A message store presents a mailbox as a numbered list of messages.
//! Numbers are assigned once per store instance and stay stable for
//! its lifetime, so a POP3 session can hide, fetch and finally delete
//! messages by number.

pub mod file;
pub mod memory;
pub mod message;
pub mod s3;
pub mod store;

pub use file::FileStore;
pub use memory::{EmptyStore, MemoryMailbox, MemoryStore};
pub use message::{Message, Payload, Snapshot};
pub use s3::{S3Bucket, S3Store};
pub use store::{MessageStore, Store, StoreProvider};
