//! Outbound Queues
//!
//! Every connection owns a bounded queue of encoded replies drained by a
//! dedicated writer task. Other parts of the server (the pub/sub broker,
//! replication fan-out) hold a cloned [`ClientHandle`] and push into that
//! queue without ever touching the socket.
//!
//! ```text
//!  command loop ──send().await──┐
//!  broker ─────────try_send─────┼──> mpsc (bounded) ──> writer task ──> socket
//!  replication ────try_send─────┘
//! ```
//!
//! A peer that cannot keep up fills its queue. Fan-out never waits on it:
//! the handle is evicted instead, which wakes the owning connection so it
//! can close.

use crate::connection::handler::ConnectionStats;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Process-unique connection identifier.
pub type ClientId = u64;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// The queue was closed because the connection is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("outbound queue closed")]
pub struct QueueClosed;

/// Sending half of a connection's outbound queue.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: ClientId,
    tx: mpsc::Sender<Bytes>,
    evicted: Arc<Notify>,
}

impl ClientHandle {
    /// Creates a handle with a fresh id and the receiver its writer drains.
    pub fn channel(capacity: usize) -> (ClientHandle, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = ClientHandle {
            id: NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed),
            tx,
            evicted: Arc::new(Notify::new()),
        };
        (handle, rx)
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Queues bytes, waiting for room. Used for a connection's own replies.
    pub async fn send(&self, bytes: Bytes) -> Result<(), QueueClosed> {
        self.tx.send(bytes).await.map_err(|_| QueueClosed)
    }

    /// Queues bytes without waiting. A full queue evicts the peer.
    ///
    /// Returns true if the bytes were queued.
    pub fn try_deliver(&self, bytes: Bytes) -> bool {
        match self.tx.try_send(bytes) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(client_id = self.id, "Outbound queue full, evicting slow peer");
                self.evict();
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Asks the owning connection to close.
    pub fn evict(&self) {
        self.evicted.notify_one();
    }

    /// Completes once [`evict`](Self::evict) has been called.
    pub async fn evicted(&self) {
        self.evicted.notified().await
    }

    /// Signal the writer uses to report a dead socket.
    pub fn eviction_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.evicted)
    }
}

/// Spawns the task that drains `rx` into `writer`.
///
/// The task ends when every [`ClientHandle`] for the queue is dropped, or
/// when a write fails or exceeds `write_timeout`, in which case the
/// connection is signalled through `evicted`.
pub fn spawn_writer<W>(
    writer: W,
    mut rx: mpsc::Receiver<Bytes>,
    write_timeout: Duration,
    stats: Arc<ConnectionStats>,
    evicted: Arc<Notify>,
) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut writer = BufWriter::new(writer);

        while let Some(first) = rx.recv().await {
            let result = tokio::time::timeout(write_timeout, async {
                let mut written = first.len();
                writer.write_all(&first).await?;
                // Coalesce whatever else is already queued into one flush.
                while let Ok(more) = rx.try_recv() {
                    written += more.len();
                    writer.write_all(&more).await?;
                }
                writer.flush().await?;
                Ok::<usize, std::io::Error>(written)
            })
            .await;

            match result {
                Ok(Ok(written)) => {
                    stats.bytes_written(written);
                    trace!(bytes = written, "Sent response");
                }
                Ok(Err(e)) => {
                    debug!(error = %e, "Write failed");
                    evicted.notify_one();
                    return;
                }
                Err(_) => {
                    warn!(timeout = ?write_timeout, "Write timed out");
                    evicted.notify_one();
                    return;
                }
            }
        }

        let _ = writer.shutdown().await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ids_are_unique() {
        let (a, _rx_a) = ClientHandle::channel(1);
        let (b, _rx_b) = ClientHandle::channel(1);
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn test_full_queue_evicts() {
        let (handle, mut rx) = ClientHandle::channel(1);

        assert!(handle.try_deliver(Bytes::from("one")));
        assert!(!handle.try_deliver(Bytes::from("two")));

        // The eviction permit is stored even without a waiter.
        tokio::time::timeout(Duration::from_secs(1), handle.evicted())
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap(), Bytes::from("one"));
    }

    #[tokio::test]
    async fn test_closed_queue() {
        let (handle, rx) = ClientHandle::channel(4);
        drop(rx);
        assert!(!handle.try_deliver(Bytes::from("x")));
        assert_eq!(handle.send(Bytes::from("x")).await, Err(QueueClosed));
    }

    #[tokio::test]
    async fn test_writer_drains_in_order() {
        let (client, mut server) = tokio::io::duplex(1024);
        let stats = Arc::new(ConnectionStats::new());
        let (handle, rx) = ClientHandle::channel(8);
        let writer = spawn_writer(
            client,
            rx,
            Duration::from_secs(1),
            Arc::clone(&stats),
            handle.eviction_signal(),
        );

        handle.send(Bytes::from("+OK\r\n")).await.unwrap();
        handle.send(Bytes::from(":1\r\n")).await.unwrap();
        drop(handle);
        writer.await.unwrap();

        let mut out = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut server, &mut out)
            .await
            .unwrap();
        assert_eq!(out, b"+OK\r\n:1\r\n");
        assert_eq!(stats.bytes_written.load(Ordering::Relaxed), 9);
    }
}
