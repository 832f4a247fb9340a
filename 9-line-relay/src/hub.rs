//! Multi-client broadcast hub.
//!
//! Every accepted connection gets its own read loop task. Lines are handed to
//! the hub's [`LineService`], and the resulting [`Action`] is carried out:
//! a direct reply, a fan-out to every other registered connection, or
//! nothing. The registry of eligible recipients sits behind one mutex so that
//! accepts, removals and broadcast snapshots never observe each other half
//! done.

use std::{collections::HashMap, future::Future, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use futures::future::join_all;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    sync::Mutex,
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    connection::{ConnectionId, LineConnection, LineReader, LineWriter},
    error::{DisconnectCause, ServiceError},
    protocol,
    service::{Action, DEFAULT_GREETING, EchoService, LineService, Message},
};

pub const DEFAULT_PORT: u16 = 9998;
pub const DEFAULT_IDLE_PERIOD: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub listen: SocketAddr,
    /// How often [`LineService::on_idle`] runs. Must be non-zero.
    pub idle_period: Duration,
    /// First line sent to every client by [`Hub::with_config`].
    pub greeting: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            idle_period: DEFAULT_IDLE_PERIOD,
            greeting: DEFAULT_GREETING.to_string(),
        }
    }
}

pub struct Hub<S: LineService = EchoService> {
    inner: Arc<HubInner<S>>,
}

struct HubInner<S> {
    service: S,
    registry: Mutex<HashMap<ConnectionId, LineWriter>>,
    idle_period: Duration,
    shutdown: CancellationToken,
}

impl<S: LineService> Clone for Hub<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Hub<EchoService> {
    /// A hub running [`EchoService`] with the configured greeting.
    pub fn with_config(config: &HubConfig) -> Self {
        Self::new(EchoService::new(config.greeting.clone()), config)
    }
}

impl<S: LineService> Hub<S> {
    pub fn new(service: S, config: &HubConfig) -> Self {
        Self {
            inner: Arc::new(HubInner {
                service,
                registry: Mutex::new(HashMap::new()),
                idle_period: config.idle_period,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn service(&self) -> &S {
        &self.inner.service
    }

    /// Accepts connections until `shutdown` resolves, then closes every
    /// registered connection.
    pub async fn run_until<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let ticker = self.spawn_idle_ticker();
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => break,
                accept_result = listener.accept() => {
                    self.handle_accept_result(accept_result);
                }
            }
        }

        info!("hub shutting down");
        self.shutdown();
        if let Err(err) = ticker.await {
            warn!(error = ?err, "idle ticker ended abnormally");
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(&self, listener: TcpListener) -> Result<()> {
        self.run_until(listener, async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }

    fn handle_accept_result(&self, result: std::io::Result<(TcpStream, SocketAddr)>) {
        match result {
            Ok((stream, _)) => {
                let hub = self.clone();
                tokio::spawn(async move {
                    hub.accept(LineConnection::from_tcp(stream)).await;
                });
            }
            Err(err) => warn!(error = ?err, "failed to accept connection"),
        }
    }

    /// Registers `conn`, sends the service's greeting and starts its read loop.
    pub async fn accept(&self, conn: LineConnection) -> ConnectionId {
        let (reader, writer) = conn.into_split();
        let id = writer.id();

        self.inner
            .registry
            .lock()
            .await
            .insert(id, writer.clone());
        info!(%id, peer = %writer.peer(), "connection accepted");

        if let Some(greeting) = self.inner.service.on_connect(id, writer.peer()) {
            if let Err(err) = writer.write_line(&greeting).await {
                self.on_disconnect(id, DisconnectCause::WriteFailed(err))
                    .await;
                return id;
            }
        }

        let hub = self.clone();
        tokio::spawn(async move { hub.read_loop(reader, writer).await });
        id
    }

    /// Removes the connection and closes it. Returns `false` if it had already
    /// been removed, in which case nothing else happens.
    pub async fn on_disconnect(&self, id: ConnectionId, cause: DisconnectCause) -> bool {
        let removed = self.inner.registry.lock().await.remove(&id);
        let Some(writer) = removed else {
            return false;
        };

        writer.close().await;
        info!(%id, peer = %writer.peer(), %cause, "connection closed");
        self.inner.service.on_disconnect(id, writer.peer(), &cause);
        true
    }

    /// Writes `line` to every registered connection except `sender`.
    ///
    /// A recipient whose write fails is closed, which makes its own read loop
    /// take it out of the registry. Returns how many recipients got the line.
    pub async fn broadcast_except(&self, sender: ConnectionId, line: &str) -> usize {
        let recipients: Vec<LineWriter> = {
            let registry = self.inner.registry.lock().await;
            registry
                .iter()
                .filter(|(id, _)| **id != sender)
                .map(|(_, writer)| writer.clone())
                .collect()
        };

        let results = join_all(recipients.iter().map(|writer| writer.write_line(line))).await;

        let mut delivered = 0;
        for (recipient, result) in recipients.iter().zip(results) {
            match result {
                Ok(()) => delivered += 1,
                Err(error) => {
                    warn!(id = %recipient.id(), peer = %recipient.peer(), %error, "broadcast write failed");
                    recipient.close().await;
                }
            }
        }
        delivered
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.registry.lock().await.len()
    }

    /// Stops the idle ticker and makes every read loop disconnect.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    fn spawn_idle_ticker(&self) -> JoinHandle<()> {
        let hub = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(hub.inner.idle_period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            let mut last = ticker.tick().await;

            loop {
                select! {
                    _ = hub.inner.shutdown.cancelled() => break,
                    now = ticker.tick() => {
                        hub.idle(now.duration_since(last));
                        last = now;
                    }
                }
            }
        })
    }

    pub fn idle(&self, delta: Duration) {
        self.inner.service.on_idle(delta);
    }

    async fn read_loop(self, mut reader: LineReader, writer: LineWriter) {
        let id = reader.id();

        let cause = loop {
            let line = select! {
                biased;
                _ = self.inner.shutdown.cancelled() => break DisconnectCause::Shutdown,
                _ = writer.closed() => break DisconnectCause::Closed,
                line = reader.read_line() => line,
            };

            match line {
                Ok(Some(text)) => {
                    if let Some(cause) = self.handle_line(&writer, text).await {
                        break cause;
                    }
                }
                Ok(None) => break DisconnectCause::EndOfStream,
                Err(err) => break DisconnectCause::ReadFailed(err),
            }
        };

        self.on_disconnect(id, cause).await;
    }

    async fn handle_line(&self, writer: &LineWriter, text: String) -> Option<DisconnectCause> {
        debug!(id = %writer.id(), peer = %writer.peer(), line = %text, "line received");
        let message = Message {
            sender: writer.id(),
            peer: writer.peer().to_string(),
            text,
        };

        match self.inner.service.on_message(&message) {
            Ok(Action::Ignore) => None,
            Ok(Action::Reply(line)) => writer
                .write_line(&line)
                .await
                .err()
                .map(DisconnectCause::WriteFailed),
            Ok(Action::Broadcast(line)) => {
                let delivered = self.broadcast_except(message.sender, &line).await;
                debug!(id = %message.sender, delivered, "broadcast");
                None
            }
            Err(ServiceError::Protocol(violation)) => {
                warn!(id = %message.sender, peer = %message.peer, %violation, "illegal characters, closing connection");
                Some(DisconnectCause::Protocol(violation))
            }
            Err(ServiceError::Dispatch(err)) => {
                warn!(id = %message.sender, peer = %message.peer, error = %err, "dispatch failed");
                writer
                    .write_line(&protocol::error_line(&err))
                    .await
                    .err()
                    .map(DisconnectCause::WriteFailed)
            }
        }
    }
}
