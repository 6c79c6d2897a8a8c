//! POP3 Command definitions
//!
//! Defines the POP3 commands supported by this server. Keywords are
//! case-sensitive.

use popbridge_common::types::parse_message_number;
use popbridge_common::MessageNumber;
use std::fmt;

/// POP3 Command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pop3Command {
    // Authorization state commands
    /// USER name - Declare identity
    User { username: String },
    /// PASS secret - Submit credentials
    Pass { password: String },

    // Transaction state commands
    /// STAT - Get mailbox status
    Stat,
    /// LIST [msg] - List message sizes
    List { msg: Option<MessageNumber> },
    /// RETR msg - Retrieve message
    Retr { msg: MessageNumber },
    /// DELE msg - Mark message for deletion
    Dele { msg: MessageNumber },
    /// NOOP - No operation
    Noop,
    /// RSET - Unmark all deletions
    Rset,
    /// TOP msg n - Get message headers and first n body lines
    Top { msg: MessageNumber, lines: usize },
    /// UIDL [msg] - Get unique ID listing
    Uidl { msg: Option<MessageNumber> },

    // Any state commands
    /// QUIT - End session
    Quit,
    /// CAPA - Get server capabilities
    Capa,

    /// Known keyword with malformed arguments
    Invalid { command: String, reason: &'static str },
    /// Unknown command
    Unknown { command: String },
}

impl Pop3Command {
    /// Keyword of the command, as sent by the client
    pub fn keyword(&self) -> &str {
        match self {
            Pop3Command::User { .. } => "USER",
            Pop3Command::Pass { .. } => "PASS",
            Pop3Command::Stat => "STAT",
            Pop3Command::List { .. } => "LIST",
            Pop3Command::Retr { .. } => "RETR",
            Pop3Command::Dele { .. } => "DELE",
            Pop3Command::Noop => "NOOP",
            Pop3Command::Rset => "RSET",
            Pop3Command::Top { .. } => "TOP",
            Pop3Command::Uidl { .. } => "UIDL",
            Pop3Command::Quit => "QUIT",
            Pop3Command::Capa => "CAPA",
            Pop3Command::Invalid { command, .. } | Pop3Command::Unknown { command } => {
                command.as_str()
            }
        }
    }
}

/// Log-safe rendering; secrets are never printed
impl fmt::Display for Pop3Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pop3Command::User { username } => write!(f, "USER {}", username),
            Pop3Command::Pass { .. } => write!(f, "PASS ****"),
            Pop3Command::List { msg: Some(msg) } => write!(f, "LIST {}", msg),
            Pop3Command::Uidl { msg: Some(msg) } => write!(f, "UIDL {}", msg),
            Pop3Command::Retr { msg } => write!(f, "RETR {}", msg),
            Pop3Command::Dele { msg } => write!(f, "DELE {}", msg),
            Pop3Command::Top { msg, lines } => write!(f, "TOP {} {}", msg, lines),
            Pop3Command::Invalid { command, reason } => write!(f, "{} ({})", command, reason),
            other => f.write_str(other.keyword()),
        }
    }
}

/// POP3 Command Parser
pub struct Pop3Parser;

impl Pop3Parser {
    /// Parse a POP3 command line (without its line terminator)
    pub fn parse(line: &str) -> Pop3Command {
        let (cmd, rest) = line.split_once(' ').unwrap_or((line, ""));
        let args: Vec<&str> = rest.split_whitespace().collect();

        let invalid = |reason| Pop3Command::Invalid {
            command: cmd.to_string(),
            reason,
        };

        match cmd {
            // Identity and secret may contain spaces
            "USER" if rest.is_empty() => invalid("missing user name"),
            "USER" => Pop3Command::User {
                username: rest.to_string(),
            },
            "PASS" if rest.is_empty() => invalid("missing password"),
            "PASS" => Pop3Command::Pass {
                password: rest.to_string(),
            },
            "STAT" | "NOOP" | "RSET" | "QUIT" | "CAPA" if !args.is_empty() => {
                invalid("unexpected argument")
            }
            "STAT" => Pop3Command::Stat,
            "NOOP" => Pop3Command::Noop,
            "RSET" => Pop3Command::Rset,
            "QUIT" => Pop3Command::Quit,
            "CAPA" => Pop3Command::Capa,
            "LIST" | "UIDL" => {
                let msg = match args.as_slice() {
                    [] => None,
                    [arg] => match parse_message_number(arg) {
                        Some(msg) => Some(msg),
                        None => return invalid("invalid message number"),
                    },
                    _ => return invalid("too many arguments"),
                };
                if cmd == "LIST" {
                    Pop3Command::List { msg }
                } else {
                    Pop3Command::Uidl { msg }
                }
            }
            "RETR" | "DELE" => match args.as_slice() {
                [arg] => match parse_message_number(arg) {
                    Some(msg) if cmd == "RETR" => Pop3Command::Retr { msg },
                    Some(msg) => Pop3Command::Dele { msg },
                    None => invalid("invalid message number"),
                },
                _ => invalid("expected one message number"),
            },
            "TOP" => match args.as_slice() {
                [msg, lines] => {
                    let lines = lines
                        .bytes()
                        .all(|b| b.is_ascii_digit())
                        .then(|| lines.parse::<usize>().ok())
                        .flatten();
                    match (parse_message_number(msg), lines) {
                        (Some(msg), Some(lines)) => Pop3Command::Top { msg, lines },
                        _ => invalid("invalid arguments"),
                    }
                }
                _ => invalid("expected message number and line count"),
            },
            _ => Pop3Command::Unknown {
                command: cmd.to_string(),
            },
        }
    }
}
