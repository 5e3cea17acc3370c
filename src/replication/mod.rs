//! Leader/Replica Replication
//!
//! - [`state`]: process-wide role, replication id, offset and the set of
//!   attached replicas (leader side).
//! - [`replica`]: the handshake a replica performs against its leader and
//!   the link that applies the leader's stream afterwards.
//!
//! Only full resynchronisation exists. Every replica (re)connect receives
//! the fixed empty snapshot followed by the live write stream.

pub mod replica;
pub mod state;

pub use replica::{run_replica_link, Handshake, HandshakeStep, ReplicationLinkError, Resync};
pub use state::{generate_repl_id, ReplicaInfo, ReplicationState, Role, EMPTY_SNAPSHOT_HEX};
