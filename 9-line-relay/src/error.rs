use std::{fmt, io};

/// Failure on the underlying line stream.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection is closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// An inbound line carried a character outside the allow-list.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal character {offending:?} at byte {position}")]
pub struct ProtocolViolation {
    pub offending: char,
    pub position: usize,
}

/// Failure while interpreting a line the service accepted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("line has no tokens")]
    NoTokens,

    #[error("{0}")]
    Other(String),
}

/// Everything a [`LineService`](crate::service::LineService) can reject a line with.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Why a hub connection left the registry.
#[derive(Debug)]
pub enum DisconnectCause {
    /// The peer closed its side.
    EndOfStream,
    /// Reading from the peer failed.
    ReadFailed(TransportError),
    /// Writing to the peer failed (greeting or reply).
    WriteFailed(TransportError),
    /// The peer sent a line with disallowed characters.
    Protocol(ProtocolViolation),
    /// The connection was closed locally, e.g. after a failed broadcast write.
    Closed,
    /// The hub is shutting down.
    Shutdown,
}

impl fmt::Display for DisconnectCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectCause::EndOfStream => f.write_str("end of stream"),
            DisconnectCause::ReadFailed(err) => write!(f, "read failed: {err}"),
            DisconnectCause::WriteFailed(err) => write!(f, "write failed: {err}"),
            DisconnectCause::Protocol(violation) => write!(f, "protocol violation: {violation}"),
            DisconnectCause::Closed => f.write_str("closed locally"),
            DisconnectCause::Shutdown => f.write_str("hub shutting down"),
        }
    }
}
