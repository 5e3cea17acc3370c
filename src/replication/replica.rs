//! Replica Link
//!
//! A server started with `--replicaof` connects to its leader, walks the
//! handshake below and then hands the socket to an ordinary
//! [`ConnectionHandler`] with a [`SessionKind::LeaderLink`] session, which
//! applies everything the leader streams.
//!
//! ```text
//! SendPing ──> AwaitPong
//!     ──> SendListeningPort ──> AwaitPortAck
//!     ──> SendCapabilities ──> AwaitCapaAck
//!     ──> SendPsync ──> AwaitFullResync
//!     ──> ReceiveSnapshot ──> Streaming
//! ```
//!
//! Every step that waits on the leader is bounded by `repl_timeout`. Any
//! failure aborts the link only; the server keeps serving clients.

use crate::commands::{CommandHandler, SessionKind};
use crate::config::LeaderAddr;
use crate::connection::{ConnectionError, ConnectionHandler};
use crate::protocol::{Frame, FrameError, FrameReader, RespValue};
use bytes::Bytes;
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info};

/// The handshake steps that wait on the leader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStep {
    Connect,
    Ping,
    ListeningPort,
    Capabilities,
    Psync,
    Snapshot,
}

impl fmt::Display for HandshakeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandshakeStep::Connect => "connect",
            HandshakeStep::Ping => "PING",
            HandshakeStep::ListeningPort => "REPLCONF listening-port",
            HandshakeStep::Capabilities => "REPLCONF capa",
            HandshakeStep::Psync => "PSYNC",
            HandshakeStep::Snapshot => "snapshot transfer",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReplicationLinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out during {0}")]
    Timeout(HandshakeStep),

    #[error("unexpected reply to {step}: {reply}")]
    UnexpectedReply { step: HandshakeStep, reply: String },

    #[error("bad frame from leader: {0}")]
    Frame(FrameError),

    #[error("leader closed the link")]
    Closed,

    #[error("replication stream failed: {0}")]
    Stream(#[from] ConnectionError),
}

impl From<FrameError> for ReplicationLinkError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Closed | FrameError::UnexpectedEof => ReplicationLinkError::Closed,
            FrameError::Io(e) => ReplicationLinkError::Io(e),
            other => ReplicationLinkError::Frame(other),
        }
    }
}

/// What the leader handed over with `+FULLRESYNC`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resync {
    pub repl_id: String,
    pub offset: u64,
    pub snapshot: Bytes,
}

#[derive(Debug)]
enum HandshakeState {
    SendPing,
    AwaitPong,
    SendListeningPort,
    AwaitPortAck,
    SendCapabilities,
    AwaitCapaAck,
    SendPsync,
    AwaitFullResync,
    ReceiveSnapshot { repl_id: String, offset: u64 },
    Streaming(Resync),
}

/// Client side of the replication handshake.
pub struct Handshake<R, W> {
    reader: FrameReader<R>,
    writer: W,
    listening_port: u16,
    step_timeout: Duration,
}

impl<R, W> Handshake<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: FrameReader<R>, writer: W, listening_port: u16, step_timeout: Duration) -> Self {
        Self {
            reader,
            writer,
            listening_port,
            step_timeout,
        }
    }

    /// Drives the state machine up to `Streaming`.
    pub async fn perform(&mut self) -> Result<Resync, ReplicationLinkError> {
        let mut state = HandshakeState::SendPing;
        loop {
            debug!(state = ?state, "Handshake");
            state = match state {
                HandshakeState::SendPing => {
                    self.send(&["PING"]).await?;
                    HandshakeState::AwaitPong
                }
                HandshakeState::AwaitPong => {
                    self.expect_status(HandshakeStep::Ping, "PONG").await?;
                    HandshakeState::SendListeningPort
                }
                HandshakeState::SendListeningPort => {
                    let port = self.listening_port.to_string();
                    self.send(&["REPLCONF", "listening-port", &port]).await?;
                    HandshakeState::AwaitPortAck
                }
                HandshakeState::AwaitPortAck => {
                    self.expect_status(HandshakeStep::ListeningPort, "OK").await?;
                    HandshakeState::SendCapabilities
                }
                HandshakeState::SendCapabilities => {
                    self.send(&["REPLCONF", "capa", "psync2"]).await?;
                    HandshakeState::AwaitCapaAck
                }
                HandshakeState::AwaitCapaAck => {
                    self.expect_status(HandshakeStep::Capabilities, "OK").await?;
                    HandshakeState::SendPsync
                }
                HandshakeState::SendPsync => {
                    self.send(&["PSYNC", "?", "-1"]).await?;
                    HandshakeState::AwaitFullResync
                }
                HandshakeState::AwaitFullResync => {
                    let reply = self.receive(HandshakeStep::Psync).await?;
                    let (repl_id, offset) = parse_fullresync(&reply)
                        .ok_or_else(|| unexpected(HandshakeStep::Psync, &reply))?;
                    HandshakeState::ReceiveSnapshot { repl_id, offset }
                }
                HandshakeState::ReceiveSnapshot { repl_id, offset } => {
                    let snapshot = tokio::time::timeout(self.step_timeout, self.reader.read_snapshot())
                        .await
                        .map_err(|_| ReplicationLinkError::Timeout(HandshakeStep::Snapshot))??;
                    debug!(bytes = snapshot.len(), "Received snapshot");
                    HandshakeState::Streaming(Resync {
                        repl_id,
                        offset,
                        snapshot,
                    })
                }
                HandshakeState::Streaming(resync) => return Ok(resync),
            };
        }
    }

    /// Returns the link halves. Bytes the leader already streamed past the
    /// snapshot stay buffered in the reader.
    pub fn into_parts(self) -> (FrameReader<R>, W) {
        (self.reader, self.writer)
    }

    async fn send(&mut self, parts: &[&str]) -> Result<(), ReplicationLinkError> {
        self.writer.write_all(&Frame::from_strs(parts).encode()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn receive(&mut self, step: HandshakeStep) -> Result<RespValue, ReplicationLinkError> {
        tokio::time::timeout(self.step_timeout, self.reader.read_value())
            .await
            .map_err(|_| ReplicationLinkError::Timeout(step))?
            .map_err(ReplicationLinkError::from)
    }

    async fn expect_status(
        &mut self,
        step: HandshakeStep,
        expected: &str,
    ) -> Result<(), ReplicationLinkError> {
        match self.receive(step).await? {
            RespValue::SimpleString(s) if s.eq_ignore_ascii_case(expected) => Ok(()),
            other => Err(unexpected(step, &other)),
        }
    }
}

fn unexpected(step: HandshakeStep, reply: &RespValue) -> ReplicationLinkError {
    ReplicationLinkError::UnexpectedReply {
        step,
        reply: reply.to_string(),
    }
}

/// Parses `+FULLRESYNC <replid> <offset>`.
fn parse_fullresync(reply: &RespValue) -> Option<(String, u64)> {
    let RespValue::SimpleString(line) = reply else {
        return None;
    };
    let mut words = line.split_ascii_whitespace();
    if !words.next()?.eq_ignore_ascii_case("FULLRESYNC") {
        return None;
    }
    let repl_id = words.next()?.to_string();
    let offset = words.next()?.parse().ok()?;
    Some((repl_id, offset))
}

/// Connects to `leader`, performs the handshake and applies the leader's
/// stream until the link drops or the server shuts down.
pub async fn run_replica_link(
    leader: LeaderAddr,
    handler: CommandHandler,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ReplicationLinkError> {
    let config = handler.config().clone();

    let stream = tokio::time::timeout(
        config.repl_timeout,
        TcpStream::connect((leader.host.as_str(), leader.port)),
    )
    .await
    .map_err(|_| ReplicationLinkError::Timeout(HandshakeStep::Connect))??;
    let peer = stream.peer_addr()?;
    info!(leader = %peer, "Connected to leader");

    let (read_half, write_half) = stream.into_split();
    let mut handshake = Handshake::new(
        FrameReader::new(read_half),
        write_half,
        config.port,
        config.repl_timeout,
    );

    let resync = tokio::select! {
        result = handshake.perform() => result?,
        _ = shutdown.changed() => return Ok(()),
    };
    info!(
        leader = %peer,
        repl_id = %resync.repl_id,
        offset = resync.offset,
        "Handshake complete, streaming"
    );
    handler.replication().adopt(resync.repl_id, resync.offset);

    let (reader, writer) = handshake.into_parts();
    let link = ConnectionHandler::new(
        reader,
        writer,
        peer,
        SessionKind::LeaderLink,
        handler,
        shutdown,
    );
    match link.run().await {
        Ok(()) | Err(ConnectionError::Shutdown) => Ok(()),
        Err(ConnectionError::ClientDisconnected) => Err(ReplicationLinkError::Closed),
        Err(e) => Err(e.into()),
    }
}
