//! Line relay and broadcast hub over newline-delimited text streams.
//!
//! Two independent components share one line transport:
//!
//! - [`connection`] frames any duplex byte stream into lines, with a single
//!   reader half and a cloneable, serialized writer half.
//! - [`relay`] bridges exactly two connections, copying lines both ways
//!   (after discarding one banner line per side) until either side ends.
//! - [`hub`] accepts many connections and fans each line out to every other
//!   client, delegating interpretation to a [`service::LineService`].
//! - [`service`] defines that strategy and the default [`service::EchoService`]
//!   (allow-list validation, `ping`/`pong`, broadcast).
//! - [`protocol`] holds the allow-list and command vocabulary.
//! - [`error`] is the error taxonomy shared by all of the above.
//! - [`cli`] parses the `hub` and `relay` subcommands.

pub mod cli;
pub mod connection;
pub mod error;
pub mod hub;
pub mod protocol;
pub mod relay;
pub mod service;
