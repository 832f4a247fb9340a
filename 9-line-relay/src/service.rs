//! Per-deployment line handling plugged into the [`Hub`](crate::hub::Hub).
//!
//! The hub owns connections, the registry and fan-out; a [`LineService`]
//! decides what each lifecycle event means. Services return an [`Action`]
//! instead of writing to connections themselves, so they stay synchronous
//! and easy to test.

use std::time::Duration;

use tracing::debug;

use crate::{
    connection::ConnectionId,
    error::{DisconnectCause, ServiceError},
    protocol::{self, Command},
};

pub const DEFAULT_GREETING: &str = "Hello";

/// One inbound line and who sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub sender: ConnectionId,
    pub peer: String,
    pub text: String,
}

/// What the hub should do with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Ignore,
    /// Send a line back to the sender only.
    Reply(String),
    /// Send a line to every registered connection except the sender.
    Broadcast(String),
}

pub trait LineService: Send + Sync + 'static {
    /// Line sent to a connection right after it is registered.
    fn on_connect(&self, _id: ConnectionId, _peer: &str) -> Option<String> {
        None
    }

    fn on_message(&self, message: &Message) -> Result<Action, ServiceError>;

    fn on_disconnect(&self, _id: ConnectionId, _peer: &str, _cause: &DisconnectCause) {}

    /// Periodic housekeeping; `delta` is the time since the previous tick.
    fn on_idle(&self, _delta: Duration) {}
}

/// Validates against the allow-list, answers `ping`, broadcasts the rest.
#[derive(Debug, Clone)]
pub struct EchoService {
    greeting: String,
}

impl EchoService {
    pub fn new(greeting: impl Into<String>) -> Self {
        Self {
            greeting: greeting.into(),
        }
    }
}

impl Default for EchoService {
    fn default() -> Self {
        Self::new(DEFAULT_GREETING)
    }
}

impl LineService for EchoService {
    fn on_connect(&self, _id: ConnectionId, _peer: &str) -> Option<String> {
        Some(self.greeting.clone())
    }

    fn on_message(&self, message: &Message) -> Result<Action, ServiceError> {
        if message.text.is_empty() {
            return Ok(Action::Ignore);
        }

        protocol::validate(&message.text)?;

        match protocol::parse(&message.text)? {
            Command::Ping => {
                debug!(sender = %message.sender, "answering ping");
                Ok(Action::Reply(protocol::PONG.to_string()))
            }
            Command::Broadcast(line) => Ok(Action::Broadcast(line.to_string())),
        }
    }
}
