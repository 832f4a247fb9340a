//! Inbound line vocabulary for the hub: the character allow-list and the
//! small command set recognized before a line is broadcast.

use crate::error::{DispatchError, ProtocolViolation};

/// Punctuation accepted in addition to ASCII letters, digits and space.
pub const ALLOWED_PUNCTUATION: &str = "{}:,[]/-+=\"'";

pub const PING: &str = "ping";
pub const PONG: &str = "pong";

/// Prefix of the single line sent back when dispatch fails.
pub const ERROR_PREFIX: &str = "ERROR: ";

pub fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == ' ' || ALLOWED_PUNCTUATION.contains(c)
}

/// Rejects the line at its first character outside the allow-list.
pub fn validate(line: &str) -> Result<(), ProtocolViolation> {
    match line.char_indices().find(|(_, c)| !is_allowed(*c)) {
        Some((position, offending)) => Err(ProtocolViolation {
            offending,
            position,
        }),
        None => Ok(()),
    }
}

/// What a validated, non-empty line asks the hub to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    Ping,
    Broadcast(&'a str),
}

/// Tokens are separated by single spaces, so a line starting with a space has
/// an empty first token and is never a command.
pub fn parse(line: &str) -> Result<Command<'_>, DispatchError> {
    if line.split(' ').all(str::is_empty) {
        return Err(DispatchError::NoTokens);
    }

    let first = line.split(' ').next().unwrap_or_default();
    if first.eq_ignore_ascii_case(PING) {
        Ok(Command::Ping)
    } else {
        Ok(Command::Broadcast(line))
    }
}

pub fn error_line(err: &DispatchError) -> String {
    format!("{ERROR_PREFIX}{err}")
}
