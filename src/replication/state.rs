//! Replication State
//!
//! One [`ReplicationState`] exists per process. On a leader it owns the
//! write offset and the set of attached replicas; on a replica it tracks
//! how many bytes of the leader's stream have been processed.
//!
//! ```text
//!   write command ──apply──> Keyspace
//!        │ (keyspace lock still held)
//!        ▼
//!   propagate(frame) ── offset += frame bytes
//!        │
//!        ├──try_send──> replica 1 queue
//!        └──try_send──> replica 2 queue
//! ```
//!
//! Propagation runs while the caller still holds the keyspace lock, so the
//! order writes reach replicas is the order they were applied.

use crate::config::LeaderAddr;
use crate::connection::outbound::{ClientHandle, ClientId};
use crate::protocol::Frame;
use bytes::{Bytes, BytesMut};
use rand::RngCore;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// An empty RDB file, served to every new replica.
pub const EMPTY_SNAPSHOT_HEX: &str = "524544495330303131fa0972656469732d76657205372e322e30fa0a72656469732d62697473c040fa056374696d65c26d08bc65fa08757365642d6d656dc2b0c41000fa08616f662d62617365c000fff06e3bfec0ff5aa2";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Leader,
    Replica { leader: LeaderAddr },
}

impl Role {
    /// Name reported by `INFO replication`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Leader => "master",
            Role::Replica { .. } => "slave",
        }
    }
}

/// Summary of one attached replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaInfo {
    pub id: ClientId,
    pub listening_port: Option<u16>,
    pub ack_offset: u64,
}

#[derive(Debug)]
struct ReplicaLink {
    handle: ClientHandle,
    listening_port: Option<u16>,
    ack_offset: u64,
}

#[derive(Debug)]
struct Inner {
    repl_id: String,
    offset: u64,
    replicas: HashMap<ClientId, ReplicaLink>,
}

#[derive(Debug)]
pub struct ReplicationState {
    role: Role,
    snapshot: Bytes,
    inner: Mutex<Inner>,
}

/// Generates a 40 character replication id.
pub fn generate_repl_id() -> String {
    let mut bytes = [0u8; 20];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

impl ReplicationState {
    /// Creates the state for a leader (`replica_of == None`) or a replica.
    pub fn new(replica_of: Option<LeaderAddr>) -> Result<Self, hex::FromHexError> {
        let snapshot = Bytes::from(hex::decode(EMPTY_SNAPSHOT_HEX)?);
        let role = match replica_of {
            Some(leader) => Role::Replica { leader },
            None => Role::Leader,
        };

        Ok(Self {
            role,
            snapshot,
            inner: Mutex::new(Inner {
                repl_id: generate_repl_id(),
                offset: 0,
                replicas: HashMap::new(),
            }),
        })
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn is_replica(&self) -> bool {
        matches!(self.role, Role::Replica { .. })
    }

    pub fn repl_id(&self) -> String {
        self.inner().repl_id.clone()
    }

    /// Leader: bytes of write commands produced. Replica: bytes of the
    /// leader's stream processed.
    pub fn offset(&self) -> u64 {
        self.inner().offset
    }

    pub fn snapshot(&self) -> &Bytes {
        &self.snapshot
    }

    // ========================================================================
    // Leader side
    // ========================================================================

    /// Advances the offset by the frame's encoded length and queues the
    /// frame to every replica. Replicas whose queue is full are dropped.
    pub fn propagate(&self, frame: &Frame) {
        let encoded = frame.encode();
        let mut inner = self.inner();
        inner.offset += encoded.len() as u64;

        inner
            .replicas
            .retain(|id, link| {
                let kept = link.handle.try_deliver(encoded.clone());
                if !kept {
                    warn!(replica = id, "Dropping replica that stopped draining its stream");
                }
                kept
            });
    }

    /// Answers `PSYNC`: queues `+FULLRESYNC <id> <offset>` and the snapshot,
    /// then registers the connection for propagation.
    ///
    /// All three happen under one lock, so no propagated write can slip in
    /// between the reported offset and registration.
    pub fn full_resync(&self, handle: &ClientHandle, listening_port: Option<u16>) -> bool {
        let mut inner = self.inner();

        let header = format!("+FULLRESYNC {} {}\r\n", inner.repl_id, inner.offset);
        let mut transfer = BytesMut::with_capacity(self.snapshot.len() + 16);
        transfer.extend_from_slice(format!("${}\r\n", self.snapshot.len()).as_bytes());
        transfer.extend_from_slice(&self.snapshot);

        if !handle.try_deliver(Bytes::from(header)) || !handle.try_deliver(transfer.freeze()) {
            return false;
        }

        inner.replicas.insert(
            handle.id(),
            ReplicaLink {
                handle: handle.clone(),
                listening_port,
                ack_offset: 0,
            },
        );
        info!(
            replica = handle.id(),
            offset = inner.offset,
            replicas = inner.replicas.len(),
            "Replica attached"
        );
        true
    }

    /// Removes a replica. Harmless for connections that never attached.
    pub fn detach(&self, id: ClientId) {
        if self.inner().replicas.remove(&id).is_some() {
            info!(replica = id, "Replica detached");
        }
    }

    /// Records a `REPLCONF ACK <offset>` from a replica.
    pub fn record_ack(&self, id: ClientId, offset: u64) {
        if let Some(link) = self.inner().replicas.get_mut(&id) {
            link.ack_offset = offset;
            debug!(replica = id, offset, "Replica acknowledged");
        }
    }

    pub fn replica_count(&self) -> usize {
        self.inner().replicas.len()
    }

    pub fn replicas(&self) -> Vec<ReplicaInfo> {
        let mut replicas: Vec<ReplicaInfo> = self
            .inner()
            .replicas
            .iter()
            .map(|(id, link)| ReplicaInfo {
                id: *id,
                listening_port: link.listening_port,
                ack_offset: link.ack_offset,
            })
            .collect();
        replicas.sort_by_key(|r| r.id);
        replicas
    }

    // ========================================================================
    // Replica side
    // ========================================================================

    /// Adopts the leader's id and offset after `+FULLRESYNC`.
    pub fn adopt(&self, repl_id: String, offset: u64) {
        let mut inner = self.inner();
        inner.repl_id = repl_id;
        inner.offset = offset;
    }

    /// Adds `bytes` read from the leader to the processed offset.
    pub fn record_processed(&self, bytes: usize) {
        self.inner().offset += bytes as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leader() -> ReplicationState {
        ReplicationState::new(None).unwrap()
    }

    #[test]
    fn test_repl_id_shape() {
        let state = leader();
        let id = state.repl_id();
        assert_eq!(id.len(), 40);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, leader().repl_id());
    }

    #[test]
    fn test_snapshot_is_an_rdb_file() {
        let state = leader();
        assert!(state.snapshot().starts_with(b"REDIS0011"));
        assert_eq!(state.snapshot().len(), 88);
    }

    #[test]
    fn test_roles() {
        assert_eq!(leader().role().as_str(), "master");

        let replica = ReplicationState::new(Some("localhost 6379".parse().unwrap())).unwrap();
        assert!(replica.is_replica());
        assert_eq!(replica.role().as_str(), "slave");
    }

    #[tokio::test]
    async fn test_full_resync_then_propagate() {
        let state = leader();
        let (handle, mut rx) = ClientHandle::channel(16);

        assert!(state.full_resync(&handle, Some(6380)));
        assert_eq!(state.replica_count(), 1);

        let header = rx.recv().await.unwrap();
        assert_eq!(header, Bytes::from(format!("+FULLRESYNC {} 0\r\n", state.repl_id())));
        let transfer = rx.recv().await.unwrap();
        assert!(transfer.starts_with(b"$88\r\nREDIS"));
        assert_eq!(transfer.len(), 4 + 88);

        let frame = Frame::from_strs(&["SET", "foo", "1"]);
        state.propagate(&frame);
        assert_eq!(state.offset(), frame.wire_len() as u64);
        assert_eq!(rx.recv().await.unwrap(), frame.encode());
    }

    #[test]
    fn test_propagate_without_replicas_still_counts() {
        let state = leader();
        state.propagate(&Frame::from_strs(&["SET", "a", "b"]));
        assert_eq!(state.offset(), 27);
    }

    #[test]
    fn test_slow_replica_is_dropped() {
        let state = leader();
        let (handle, _rx) = ClientHandle::channel(2);
        assert!(state.full_resync(&handle, None));

        state.propagate(&Frame::from_strs(&["SET", "a", "b"]));
        assert_eq!(state.replica_count(), 0);
    }

    #[test]
    fn test_ack_and_detach() {
        let state = leader();
        let (handle, _rx) = ClientHandle::channel(16);
        state.full_resync(&handle, Some(7000));

        state.record_ack(handle.id(), 31);
        assert_eq!(
            state.replicas(),
            vec![ReplicaInfo {
                id: handle.id(),
                listening_port: Some(7000),
                ack_offset: 31
            }]
        );

        state.detach(handle.id());
        assert_eq!(state.replica_count(), 0);
    }

    #[test]
    fn test_replica_offsets() {
        let state = ReplicationState::new(Some("localhost 6379".parse().unwrap())).unwrap();
        state.adopt("abc".to_string(), 100);
        state.record_processed(37);
        assert_eq!(state.offset(), 137);
        assert_eq!(state.repl_id(), "abc");
    }
}
