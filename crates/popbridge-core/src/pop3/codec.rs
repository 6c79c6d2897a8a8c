//! POP3 wire framing
//!
//! Commands arrive as CRLF-terminated lines (a bare LF is tolerated).
//! Replies are written as CRLF-terminated lines; multi-line replies end
//! with a `.` line and content lines starting with `.` get an extra `.`.

use super::response::Response;
use bytes::{BufMut as _, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// Longest command line accepted, terminator included
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

const CRLF: &[u8] = b"\r\n";
const TERMINATOR: u8 = b'.';

/// [tokio codec] for the server side of a POP3 connection
///
/// [tokio codec]: tokio_util::codec
#[derive(Debug, Default)]
pub struct Pop3Codec {
    /// Bytes already searched for a line feed
    next_index: usize,
}

impl Pop3Codec {
    pub fn new() -> Self {
        Self::default()
    }

    fn take_line(&mut self, src: &mut BytesMut, end: usize) -> String {
        let line = src.split_to(end);
        self.next_index = 0;
        let mut line = &line[..];
        if let Some(stripped) = line.strip_suffix(b"\n") {
            line = stripped;
        }
        if let Some(stripped) = line.strip_suffix(b"\r") {
            line = stripped;
        }
        String::from_utf8_lossy(line).into_owned()
    }
}

impl Decoder for Pop3Codec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match src[self.next_index..].iter().position(|b| *b == b'\n') {
            Some(offset) => {
                let end = self.next_index + offset + 1;
                if end > MAX_LINE_LENGTH {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "command line is too long",
                    ));
                }
                Ok(Some(self.take_line(src, end)))
            }
            None if src.len() > MAX_LINE_LENGTH => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "command line is too long",
            )),
            None => {
                self.next_index = src.len();
                Ok(None)
            }
        }
    }

    /// An unterminated line at end of stream is never a command
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(line) => Ok(Some(line)),
            None if src.is_empty() => Ok(None),
            None => {
                src.clear();
                self.next_index = 0;
                Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed in the middle of a command line",
                ))
            }
        }
    }
}

impl Encoder<Response> for Pop3Codec {
    type Error = io::Error;

    fn encode(&mut self, item: Response, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Response::Line(status) => {
                dst.reserve(status.len() + CRLF.len());
                dst.put_slice(status.as_bytes());
                dst.put_slice(CRLF);
            }
            Response::Multi { status, lines } => {
                let size: usize = lines.iter().map(|line| line.len() + 3).sum();
                dst.reserve(status.len() + size + 5);

                dst.put_slice(status.as_bytes());
                dst.put_slice(CRLF);
                for line in lines {
                    if line.first() == Some(&TERMINATOR) {
                        dst.put_u8(TERMINATOR);
                    }
                    dst.put_slice(&line);
                    dst.put_slice(CRLF);
                }
                dst.put_u8(TERMINATOR);
                dst.put_slice(CRLF);
            }
        }
        Ok(())
    }
}
