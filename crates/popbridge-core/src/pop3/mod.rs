//! POP3 Server Module
//!
//! Implements the Post Office Protocol version 3 (POP3) over externally
//! stored messages: USER/PASS, STAT, LIST, UIDL, TOP, RETR, DELE, NOOP,
//! RSET, QUIT and CAPA.

mod codec;
mod command;
mod response;
mod server;
mod session;

pub use codec::{Pop3Codec, MAX_LINE_LENGTH};
pub use command::{Pop3Command, Pop3Parser};
pub use response::{Pop3Response, Response};
pub use server::{handle_connection, Pop3Config, Pop3Server};
pub use session::{Pop3Session, Reply, SessionState};
