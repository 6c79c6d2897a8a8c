//! Common types for popbridge

use std::collections::BTreeSet;

/// Session-scoped, 1-based message sequence number
pub type MessageNumber = u32;

/// Message numbers hidden from a listing (marked for deletion)
pub type Exclusions = BTreeSet<MessageNumber>;

/// Parse a POP3 message number argument.
///
/// Only strictly positive decimal integers are accepted.
pub fn parse_message_number(arg: &str) -> Option<MessageNumber> {
    if arg.is_empty() || !arg.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match arg.parse::<MessageNumber>() {
        Ok(0) | Err(_) => None,
        Ok(n) => Some(n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_message_number() {
        assert_eq!(parse_message_number("1"), Some(1));
        assert_eq!(parse_message_number("42"), Some(42));
        assert_eq!(parse_message_number("0"), None);
        assert_eq!(parse_message_number("-1"), None);
        assert_eq!(parse_message_number("+1"), None);
        assert_eq!(parse_message_number("abc"), None);
        assert_eq!(parse_message_number(""), None);
        assert_eq!(parse_message_number("99999999999"), None);
    }
}
