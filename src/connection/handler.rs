//! Connection Tasks
//!
//! Each connection gets its own task running [`ConnectionHandler::run`]:
//! read a frame, execute it, queue the reply, repeat. Replies never touch
//! the socket directly; they go through the connection's outbound queue
//! and a writer task (see [`outbound`](super::outbound)).
//!
//! ## Lifecycle
//!
//! ```text
//! 1. Peer connects
//!        │
//!        ▼
//! 2. Socket split: read half -> FrameReader, write half -> writer task
//!        │
//!        ▼
//! 3. ┌───────────────────────────────────────────┐
//!    │  select! {                                │
//!    │    next frame (idle timeout)  -> execute  │
//!    │    eviction signal            -> close    │
//!    │    server shutdown            -> close    │
//!    │  }                                        │
//!    └───────────────────────────────────────────┘
//!        │
//!        ▼
//! 4. Cleanup: leave channels, detach replica, drain writer
//! ```
//!
//! The same loop drives a replica's link to its leader once the handshake
//! is done; only the session kind differs.

use crate::commands::{ClientSession, CommandHandler, Outcome, SessionKind};
use crate::connection::outbound::{spawn_writer, ClientHandle, QueueClosed};
use crate::protocol::{Frame, FrameError, FrameReader, ParseError, RespValue};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Server-wide counters, reported by `INFO stats`.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    pub connections_accepted: AtomicU64,
    pub active_connections: AtomicU64,
    pub commands_processed: AtomicU64,
    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Drives one connection: a client, an attached replica, or this server's
/// link to its leader.
pub struct ConnectionHandler<R> {
    reader: FrameReader<R>,

    /// Peer address (for logging)
    addr: SocketAddr,

    session: ClientSession,

    command_handler: CommandHandler,

    writer: JoinHandle<()>,
    eviction: Arc<Notify>,
    shutdown: watch::Receiver<bool>,
    reported_bytes: u64,
}

impl<R: AsyncRead + Unpin> ConnectionHandler<R> {
    /// Spawns the writer task for `writer` and creates the session.
    pub fn new<W>(
        reader: FrameReader<R>,
        writer: W,
        addr: SocketAddr,
        kind: SessionKind,
        command_handler: CommandHandler,
        shutdown: watch::Receiver<bool>,
    ) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let config = command_handler.config();
        let (outbound, rx) = ClientHandle::channel(config.output_buffer);
        let eviction = outbound.eviction_signal();
        let writer = spawn_writer(
            writer,
            rx,
            config.write_timeout,
            Arc::clone(command_handler.stats()),
            Arc::clone(&eviction),
        );

        command_handler.stats().connection_opened();
        let session = command_handler.new_session(kind, outbound);

        Self {
            reader,
            addr,
            session,
            command_handler,
            writer,
            eviction,
            shutdown,
            reported_bytes: 0,
        }
    }

    /// Runs the connection until the peer leaves, misbehaves, is evicted or
    /// the server shuts down.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        match self.session.kind {
            SessionKind::LeaderLink => info!(leader = %self.addr, "Streaming from leader"),
            _ => info!(client = %self.addr, "Client connected"),
        }

        let result = self.main_loop().await;

        match &result {
            Ok(()) => debug!(client = %self.addr, "Client disconnected gracefully"),
            Err(e) => match e {
                ConnectionError::ClientDisconnected => {
                    debug!(client = %self.addr, "Client disconnected")
                }
                ConnectionError::Io(io_err)
                    if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
                {
                    debug!(client = %self.addr, "Connection reset by client")
                }
                ConnectionError::Shutdown => debug!(client = %self.addr, "Closed for shutdown"),
                ConnectionError::Evicted | ConnectionError::IdleTimeout => {
                    debug!(client = %self.addr, reason = %e, "Closing connection")
                }
                _ => warn!(client = %self.addr, error = %e, "Connection error"),
            },
        }

        let ConnectionHandler {
            mut session,
            command_handler,
            writer,
            ..
        } = self;

        command_handler.disconnect(&mut session);
        let write_timeout = command_handler.config().write_timeout;
        // Dropping the last handle lets the writer drain and exit.
        drop(session);
        if tokio::time::timeout(write_timeout, writer).await.is_err() {
            debug!("Writer did not drain before the deadline");
        }

        command_handler.stats().connection_closed();
        result
    }

    /// Reads frames until something ends the connection.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            if *self.shutdown.borrow() {
                return Err(ConnectionError::Shutdown);
            }

            let idle_timeout = match self.session.kind {
                SessionKind::Client => self.command_handler.config().idle_timeout,
                _ => None,
            };

            let frame = tokio::select! {
                result = read_frame(&mut self.reader, idle_timeout) => result,
                _ = self.eviction.notified() => return Err(ConnectionError::Evicted),
                _ = self.shutdown.changed() => return Err(ConnectionError::Shutdown),
            };

            let frame = match frame {
                Ok(frame) => frame,
                Err(ConnectionError::Parse(e)) => {
                    warn!(client = %self.addr, error = %e, "Parse error");
                    let _ = self
                        .send(RespValue::error(format!("ERR Protocol error: {}", e)))
                        .await;
                    return Err(ConnectionError::Parse(e));
                }
                Err(e) => return Err(e),
            };

            let total = self.reader.bytes_read();
            self.command_handler
                .stats()
                .bytes_read((total - self.reported_bytes) as usize);
            self.reported_bytes = total;
            self.command_handler.stats().command_processed();
            trace!(client = %self.addr, command = %frame.name(), "Executing");

            match self.command_handler.execute(&mut self.session, frame) {
                Outcome::Reply(reply) => self.send(reply).await?,
                Outcome::Replies(replies) => {
                    for reply in replies {
                        self.send(reply).await?;
                    }
                }
                Outcome::Silent => {}
                Outcome::Close(reply) => {
                    self.send(reply).await?;
                    return Ok(());
                }
            }
        }
    }

    /// Queues a reply for the writer task.
    async fn send(&self, reply: RespValue) -> Result<(), ConnectionError> {
        self.session.outbound.send(reply.to_bytes()).await?;
        Ok(())
    }
}

async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut FrameReader<R>,
    idle_timeout: Option<Duration>,
) -> Result<Frame, ConnectionError> {
    match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, reader.read_frame())
            .await
            .map_err(|_| ConnectionError::IdleTimeout)?
            .map_err(ConnectionError::from),
        None => reader.read_frame().await.map_err(ConnectionError::from),
    }
}

/// Why a connection ended.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed request; the peer gets `-ERR Protocol error` first.
    #[error("protocol error: {0}")]
    Parse(#[from] ParseError),

    #[error("peer disconnected")]
    ClientDisconnected,

    /// Peer closed in the middle of a frame.
    #[error("peer closed mid-frame")]
    UnexpectedEof,

    #[error("request exceeds the read buffer limit")]
    BufferFull,

    #[error("idle timeout")]
    IdleTimeout,

    /// The peer could not keep up with its outbound queue, or its socket
    /// failed while writing.
    #[error("evicted")]
    Evicted,

    #[error("server shutting down")]
    Shutdown,

    #[error(transparent)]
    QueueClosed(#[from] QueueClosed),
}

impl From<FrameError> for ConnectionError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(e) => ConnectionError::Io(e),
            FrameError::Parse(e) => ConnectionError::Parse(e),
            FrameError::Closed => ConnectionError::ClientDisconnected,
            FrameError::UnexpectedEof => ConnectionError::UnexpectedEof,
            FrameError::BufferFull => ConnectionError::BufferFull,
        }
    }
}

/// Runs an accepted client socket to completion.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    command_handler: CommandHandler,
    shutdown: watch::Receiver<bool>,
) {
    let (read_half, write_half) = stream.into_split();
    let handler = ConnectionHandler::new(
        FrameReader::new(read_half),
        write_half,
        addr,
        SessionKind::Client,
        command_handler,
        shutdown,
    );
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected | ConnectionError::Shutdown => {}
            ConnectionError::Io(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %addr, error = %e, "Connection ended with error");
            }
        }
    }
}
