//! Point-to-point bridge between two line connections.
//!
//! Lines read from A are written to B and vice versa. The A→B copy loop runs
//! on a spawned task while B→A runs on the caller's task. Both loops share a
//! `running` flag which the first loop to hit end-of-stream or an error clears;
//! the other loop checks it around every read. A read that is already blocked
//! is never interrupted, it returns on its own I/O event.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::{Context, Result};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::{
    connection::{LineConnection, LineReader, LineWriter},
    error::TransportError,
};

pub const DEFAULT_UPSTREAM_PORT: u16 = 9999;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    AToB,
    BToA,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::AToB => f.write_str("A->B"),
            Direction::BToA => f.write_str("B->A"),
        }
    }
}

/// How one copy loop ended.
#[derive(Debug)]
pub enum StreamEnd {
    EndOfStream,
    ReadFailed(TransportError),
    WriteFailed(TransportError),
    /// The other direction ended first.
    Stopped,
    /// The spawned copy loop panicked or was cancelled.
    Aborted,
}

#[derive(Debug)]
pub struct DirectionReport {
    pub forwarded: u64,
    pub end: StreamEnd,
}

#[derive(Debug)]
pub struct RelayReport {
    pub a_to_b: DirectionReport,
    pub b_to_a: DirectionReport,
}

pub struct Relay {
    a: LineConnection,
    b: LineConnection,
    running: Arc<AtomicBool>,
}

impl Relay {
    pub fn new(a: LineConnection, b: LineConnection) -> Self {
        Self {
            a,
            b,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Connects to both endpoints over TCP.
    pub async fn connect(a: (&str, u16), b: (&str, u16)) -> Result<Self> {
        info!("connecting to {}:{}", a.0, a.1);
        let a = TcpStream::connect(a)
            .await
            .with_context(|| format!("failed to connect to {}:{}", a.0, a.1))?;
        info!("connecting to {}:{}", b.0, b.1);
        let b = TcpStream::connect(b)
            .await
            .with_context(|| format!("failed to connect to {}:{}", b.0, b.1))?;

        Ok(Self::new(
            LineConnection::from_tcp(a),
            LineConnection::from_tcp(b),
        ))
    }

    /// Copies lines both ways until either side ends, then closes both.
    ///
    /// The first line read from each side is a banner and is not forwarded.
    pub async fn run(self) -> RelayReport {
        let Relay { a, b, running } = self;
        running.store(true, Ordering::SeqCst);
        info!(a = %a.peer(), b = %b.peer(), "relay started");

        let (a_reader, a_writer) = a.into_split();
        let (b_reader, b_writer) = b.into_split();

        let forward = tokio::spawn(pump(
            Direction::AToB,
            a_reader,
            b_writer.clone(),
            Arc::clone(&running),
        ));
        let b_to_a = pump(
            Direction::BToA,
            b_reader,
            a_writer.clone(),
            Arc::clone(&running),
        )
        .await;

        let a_to_b = match forward.await {
            Ok(report) => report,
            Err(err) => {
                warn!(error = ?err, "A->B copy loop did not finish");
                running.store(false, Ordering::SeqCst);
                DirectionReport {
                    forwarded: 0,
                    end: StreamEnd::Aborted,
                }
            }
        };

        a_writer.close().await;
        b_writer.close().await;
        info!(
            a_to_b = a_to_b.forwarded,
            b_to_a = b_to_a.forwarded,
            "relay finished"
        );

        RelayReport { a_to_b, b_to_a }
    }
}

async fn pump(
    direction: Direction,
    mut source: LineReader,
    sink: LineWriter,
    running: Arc<AtomicBool>,
) -> DirectionReport {
    let mut forwarded = 0;
    let end = copy_lines(direction, &mut source, &sink, &running, &mut forwarded).await;

    if running.swap(false, Ordering::SeqCst) {
        info!(%direction, end = ?end, "relay stopping");
    }
    sink.close().await;

    DirectionReport { forwarded, end }
}

async fn copy_lines(
    direction: Direction,
    source: &mut LineReader,
    sink: &LineWriter,
    running: &AtomicBool,
    forwarded: &mut u64,
) -> StreamEnd {
    match source.read_line().await {
        Ok(Some(banner)) => debug!(%direction, %banner, "discarding first line"),
        Ok(None) => return StreamEnd::EndOfStream,
        Err(err) => return StreamEnd::ReadFailed(err),
    }

    while running.load(Ordering::SeqCst) {
        let line = match source.read_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return StreamEnd::EndOfStream,
            Err(err) => return StreamEnd::ReadFailed(err),
        };

        if !running.load(Ordering::SeqCst) {
            debug!(%direction, %line, "dropping line read after stop");
            return StreamEnd::Stopped;
        }

        debug!(%direction, %line, "forwarding");
        if let Err(err) = sink.write_line(&line).await {
            return StreamEnd::WriteFailed(err);
        }
        *forwarded += 1;
    }

    StreamEnd::Stopped
}
