//! Line framing over any duplex byte stream.
//!
//! A [`LineConnection`] splits into a [`LineReader`], owned by exactly one read
//! loop, and a cloneable [`LineWriter`] whose writes are serialized behind a
//! mutex so concurrent senders never interleave partial lines. Closing through
//! any writer handle shuts the write side down and wakes whoever is waiting on
//! [`LineWriter::closed`], typically the task owning the reader.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
    sync::Mutex,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::TransportError;

/// Appended to every outbound line.
pub const LINE_TERMINATOR: &str = "\r\n";

const LINE_ENDINGS: &[char] = &['\n', '\r'];

type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Shared {
    id: ConnectionId,
    peer: String,
    closed: CancellationToken,
}

/// One duplex line-oriented stream.
pub struct LineConnection {
    reader: LineReader,
    writer: LineWriter,
}

impl LineConnection {
    /// Wraps an accepted or connected TCP socket, labelled with its peer address.
    pub fn from_tcp(stream: TcpStream) -> Self {
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let (reader, writer) = stream.into_split();
        Self::from_parts(reader, writer, peer)
    }

    /// Wraps any duplex stream, e.g. an in-memory pipe.
    pub fn from_stream<S>(stream: S, peer: impl Into<String>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::from_parts(reader, writer, peer)
    }

    pub fn from_parts<R, W>(reader: R, writer: W, peer: impl Into<String>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let shared = Arc::new(Shared {
            id: ConnectionId::next(),
            peer: peer.into(),
            closed: CancellationToken::new(),
        });

        Self {
            reader: LineReader {
                shared: Arc::clone(&shared),
                inner: BufReader::new(Box::new(reader)),
            },
            writer: LineWriter {
                shared,
                sink: Arc::new(Mutex::new(Some(Box::new(writer)))),
            },
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.reader.id()
    }

    pub fn peer(&self) -> &str {
        self.reader.peer()
    }

    pub async fn read_line(&mut self) -> Result<Option<String>, TransportError> {
        self.reader.read_line().await
    }

    pub async fn write_line(&self, line: &str) -> Result<(), TransportError> {
        self.writer.write_line(line).await
    }

    pub async fn close(&self) {
        self.writer.close().await;
    }

    pub fn into_split(self) -> (LineReader, LineWriter) {
        (self.reader, self.writer)
    }
}

/// Read half of a [`LineConnection`].
pub struct LineReader {
    shared: Arc<Shared>,
    inner: BufReader<BoxedRead>,
}

impl LineReader {
    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    pub fn peer(&self) -> &str {
        &self.shared.peer
    }

    /// Next line with its terminator stripped, or `None` once the peer has
    /// closed its side.
    pub async fn read_line(&mut self) -> Result<Option<String>, TransportError> {
        let mut line = String::new();
        let bytes = self.inner.read_line(&mut line).await?;
        if bytes == 0 {
            return Ok(None);
        }

        let len = line.trim_end_matches(LINE_ENDINGS).len();
        line.truncate(len);
        Ok(Some(line))
    }
}

/// Cloneable write half of a [`LineConnection`].
#[derive(Clone)]
pub struct LineWriter {
    shared: Arc<Shared>,
    sink: Arc<Mutex<Option<BoxedWrite>>>,
}

impl LineWriter {
    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    pub fn peer(&self) -> &str {
        &self.shared.peer
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    /// Resolves once any handle has closed the connection.
    pub async fn closed(&self) {
        self.shared.closed.cancelled().await;
    }

    /// Writes `line` followed by [`LINE_TERMINATOR`] and flushes.
    pub async fn write_line(&self, line: &str) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let mut sink = self.sink.lock().await;
        let writer = sink.as_mut().ok_or(TransportError::Closed)?;

        let mut framed = String::with_capacity(line.len() + LINE_TERMINATOR.len());
        framed.push_str(line);
        framed.push_str(LINE_TERMINATOR);

        // A peer that stops reading must not keep `close` waiting on the lock.
        tokio::select! {
            _ = self.shared.closed.cancelled() => Err(TransportError::Closed),
            written = async {
                writer.write_all(framed.as_bytes()).await?;
                writer.flush().await
            } => written.map_err(TransportError::from),
        }
    }

    /// Shuts the write side down and wakes the reader's owner. Idempotent.
    ///
    /// A write blocked on a peer that is not reading fails with
    /// [`TransportError::Closed`] instead of holding the stream.
    pub async fn close(&self) {
        self.shared.closed.cancel();

        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink {
            if let Err(error) = sink.shutdown().await {
                debug!(id = %self.id(), ?error, "shutdown after close failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt, duplex},
        time::timeout,
    };

    use super::*;

    #[tokio::test]
    async fn read_line_strips_terminators() {
        let (local, mut remote) = duplex(1024);
        let mut conn = LineConnection::from_stream(local, "pipe");

        remote
            .write_all(b"hello\r\nworld\n\r\n")
            .await
            .expect("write to pipe");
        drop(remote);

        assert_eq!(conn.read_line().await.unwrap().as_deref(), Some("hello"));
        assert_eq!(conn.read_line().await.unwrap().as_deref(), Some("world"));
        assert_eq!(conn.read_line().await.unwrap().as_deref(), Some(""));
        assert!(conn.read_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn write_line_appends_crlf() {
        let (local, mut remote) = duplex(1024);
        let conn = LineConnection::from_stream(local, "pipe");

        conn.write_line("pong").await.expect("write line");
        conn.close().await;

        let mut received = String::new();
        remote
            .read_to_string(&mut received)
            .await
            .expect("read until close");
        assert_eq!(received, "pong\r\n");
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (local, _remote) = duplex(1024);
        let (_reader, writer) = LineConnection::from_stream(local, "pipe").into_split();
        let other = writer.clone();

        writer.close().await;
        other.close().await;
        writer.close().await;

        assert!(other.is_closed());
        assert!(matches!(
            writer.write_line("late").await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn close_wakes_reader_owner() {
        let (local, _remote) = duplex(1024);
        let conn = LineConnection::from_stream(local, "pipe");
        let (_reader, writer) = conn.into_split();
        let watcher = writer.clone();

        let waiter = tokio::spawn(async move {
            watcher.closed().await;
            watcher.is_closed()
        });
        writer.close().await;

        assert!(waiter.await.expect("waiter task"));
    }

    #[tokio::test]
    async fn close_unblocks_stalled_write() {
        // The remote never reads, so a long line fills the pipe and blocks.
        let (local, _remote) = duplex(16);
        let (_reader, writer) = LineConnection::from_stream(local, "pipe").into_split();
        let stalled = writer.clone();

        let write = tokio::spawn(async move { stalled.write_line(&"x".repeat(256)).await });
        tokio::task::yield_now().await;

        timeout(Duration::from_secs(1), writer.close())
            .await
            .expect("close waited on the stalled write");
        let result = timeout(Duration::from_secs(1), write)
            .await
            .expect("stalled write never returned")
            .expect("writer task");
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[test]
    fn ids_are_unique() {
        let (a, _) = duplex(8);
        let (b, _) = duplex(8);
        let a = LineConnection::from_stream(a, "a");
        let b = LineConnection::from_stream(b, "b");
        assert_ne!(a.id(), b.id());
        assert_eq!(a.peer(), "a");
    }
}
