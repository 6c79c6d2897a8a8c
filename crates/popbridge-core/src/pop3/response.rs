//! POP3 Response generation
//!
//! Responses are built here and serialized by the codec, which adds line
//! terminators, dot-stuffing and the multi-line terminator.

use bytes::Bytes;
use popbridge_common::MessageNumber;

/// A reply to one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Single status line
    Line(String),
    /// Status line followed by content lines and the `.` terminator
    Multi { status: String, lines: Vec<Bytes> },
}

impl Response {
    /// The status line
    pub fn status(&self) -> &str {
        match self {
            Response::Line(status) | Response::Multi { status, .. } => status,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status().starts_with("+OK")
    }
}

/// POP3 Response builder
pub struct Pop3Response;

impl Pop3Response {
    /// Server greeting
    pub fn greeting(server_name: &str) -> Response {
        Response::Line(format!("+OK {} POP3 server ready", server_name))
    }

    /// Positive response
    pub fn ok(message: &str) -> Response {
        Response::Line(format!("+OK {}", message))
    }

    /// Positive response with no message
    pub fn ok_simple() -> Response {
        Response::Line("+OK".to_string())
    }

    /// Negative response
    pub fn err(message: &str) -> Response {
        Response::Line(format!("-ERR {}", message))
    }

    /// Negative response for a number that does not resolve
    pub fn no_such_message(msg: MessageNumber) -> Response {
        Self::err(&format!("no such message {}", msg))
    }

    /// STAT response
    pub fn stat(count: usize, size: u64) -> Response {
        Response::Line(format!("+OK {} {}", count, size))
    }

    /// LIST/UIDL single message response
    pub fn scan_single(msg: MessageNumber, value: impl std::fmt::Display) -> Response {
        Response::Line(format!("+OK {} {}", msg, value))
    }

    /// LIST/UIDL multi-line response
    pub fn scan_listing<I, V>(entries: I) -> Response
    where
        I: IntoIterator<Item = (MessageNumber, V)>,
        V: std::fmt::Display,
    {
        Response::Multi {
            status: "+OK".to_string(),
            lines: entries
                .into_iter()
                .map(|(msg, value)| Bytes::from(format!("{} {}", msg, value)))
                .collect(),
        }
    }

    /// RETR response
    pub fn retr(size: u64, lines: Vec<Bytes>) -> Response {
        Response::Multi {
            status: format!("+OK {} octets", size),
            lines,
        }
    }

    /// TOP response
    pub fn top(lines: Vec<Bytes>) -> Response {
        Response::Multi {
            status: "+OK".to_string(),
            lines,
        }
    }

    /// CAPA response
    pub fn capabilities() -> Response {
        Response::Multi {
            status: "+OK Capability list follows".to_string(),
            lines: ["TOP", "UIDL", "USER", "IMPLEMENTATION popbridge"]
                .into_iter()
                .map(|line| Bytes::from_static(line.as_bytes()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_greeting() {
        let greeting = Pop3Response::greeting("popbridge");
        assert!(greeting.is_ok());
        assert_eq!(greeting.status(), "+OK popbridge POP3 server ready");
    }

    #[test]
    fn test_ok() {
        assert_eq!(
            Pop3Response::ok("Success"),
            Response::Line("+OK Success".to_string())
        );
        assert_eq!(Pop3Response::ok_simple().status(), "+OK");
    }

    #[test]
    fn test_err() {
        let err = Pop3Response::err("Failed");
        assert_eq!(err.status(), "-ERR Failed");
        assert!(!err.is_ok());
        assert_eq!(Pop3Response::no_such_message(3).status(), "-ERR no such message 3");
    }

    #[test]
    fn test_stat() {
        assert_eq!(Pop3Response::stat(5, 1000).status(), "+OK 5 1000");
    }

    #[test]
    fn test_scan_listing() {
        let response = Pop3Response::scan_listing(vec![(1, "abc"), (3, "def")]);
        assert_eq!(
            response,
            Response::Multi {
                status: "+OK".to_string(),
                lines: vec![Bytes::from("1 abc"), Bytes::from("3 def")],
            }
        );
        assert_eq!(Pop3Response::scan_single(2, 120).status(), "+OK 2 120");
    }

    #[test]
    fn test_capabilities() {
        match Pop3Response::capabilities() {
            Response::Multi { lines, .. } => {
                assert!(lines.contains(&Bytes::from_static(b"UIDL")));
                assert!(lines.contains(&Bytes::from_static(b"TOP")));
                assert!(lines.contains(&Bytes::from_static(b"USER")));
            }
            other => panic!("Expected multi-line response, got {:?}", other),
        }
    }
}
