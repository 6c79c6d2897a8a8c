//! Message descriptors and raw payload handling

use bytes::Bytes;
use popbridge_common::MessageNumber;
use std::collections::BTreeMap;

/// Numbered view of the visible messages of a mailbox.
///
/// Ordered by message number, which is the order LIST and UIDL report in.
pub type Snapshot = BTreeMap<MessageNumber, Message>;

/// A message as listed by a store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Opaque unique identifier reported by UIDL
    pub id: String,
    /// Size in octets
    pub size: u64,
    /// Raw payload, present once it has been fetched
    pub payload: Option<Payload>,
}

impl Message {
    /// Descriptor whose payload has not been fetched yet
    pub fn new(id: impl Into<String>, size: u64) -> Self {
        Self {
            id: id.into(),
            size,
            payload: None,
        }
    }

    /// Whether `id` can be reported by UIDL as is: non-empty and made of
    /// printable ASCII without spaces (0x21 to 0x7E)
    pub fn is_valid_id(id: &str) -> bool {
        !id.is_empty() && id.bytes().all(|b| (0x21..=0x7e).contains(&b))
    }

    /// Descriptor with its payload already in hand
    pub fn with_payload(id: impl Into<String>, payload: impl Into<Payload>) -> Self {
        let payload = payload.into();
        Self {
            id: id.into(),
            size: payload.len() as u64,
            payload: Some(payload),
        }
    }
}

/// Raw RFC 5322 message bytes
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Payload(Bytes);

impl Payload {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }

    /// Split the payload into lines.
    ///
    /// Lines end at LF; a CR before the LF is dropped. A payload that ends
    /// with a newline does not produce a trailing empty line.
    pub fn lines(&self) -> Vec<Bytes> {
        let mut lines = Vec::new();
        let mut start = 0;
        for (pos, byte) in self.0.iter().enumerate() {
            if *byte == b'\n' {
                lines.push(self.line(start, pos));
                start = pos + 1;
            }
        }
        if start < self.0.len() {
            lines.push(self.line(start, self.0.len()));
        }
        lines
    }

    /// The header block (every line up to and including the first blank
    /// line) followed by at most `body_lines` lines of the body.
    pub fn top(&self, body_lines: usize) -> Vec<Bytes> {
        let mut all = self.lines().into_iter();
        let mut lines = Vec::new();
        for line in all.by_ref() {
            let blank = line.is_empty();
            lines.push(line);
            if blank {
                break;
            }
        }
        lines.extend(all.take(body_lines));
        lines
    }

    fn line(&self, start: usize, end: usize) -> Bytes {
        let end = if end > start && self.0[end - 1] == b'\r' {
            end - 1
        } else {
            end
        };
        self.0.slice(start..end)
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Bytes::from(bytes))
    }
}

impl From<&'static str> for Payload {
    fn from(text: &'static str) -> Self {
        Self(Bytes::from_static(text.as_bytes()))
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self(Bytes::from(text))
    }
}
