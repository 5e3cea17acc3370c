//! # redwire
//!
//! An in-memory data-structure server speaking RESP. It serves strings with
//! expiry, lists, sorted sets, geospatial queries, append-only streams,
//! publish/subscribe and `MULTI`/`EXEC` transactions, and can run as a
//! leader streaming writes to replicas or as a replica of another server.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                                redwire                                │
//! │                                                                       │
//! │  ┌────────────┐    ┌──────────────┐    ┌────────────────┐             │
//! │  │  Server    │───>│ Connection   │───>│ CommandHandler │             │
//! │  │ (accept)   │    │  Handler     │    │  + session     │             │
//! │  └─────┬──────┘    └──────┬───────┘    └───┬────┬────┬──┘             │
//! │        │                  │ outbound       │    │    │                │
//! │        │                  ▼ queue          ▼    │    ▼                │
//! │        │           ┌──────────────┐  ┌─────────┐│ ┌──────────────────┐│
//! │        │           │ writer task  │  │Keyspace ││ │ReplicationState  ││
//! │        │           └──────────────┘  │ (Mutex) ││ │ offset, replicas ││
//! │        │                             └─────────┘▼ └──────────────────┘│
//! │        │                                   ┌────────┐                 │
//! │        └──> replica link (if --replicaof)  │ Broker │                 │
//! │                                            └────────┘                 │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use redwire::config::ServerConfig;
//! use redwire::server::Server;
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = Server::bind(ServerConfig::default()).await?;
//!     let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//!     server.run_until(shutdown_rx).await
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP parser, reply values and request frames
//! - [`storage`]: the keyspace and its sorted-set, geohash and stream types
//! - [`commands`]: dispatch, transactions and per-connection sessions
//! - [`connection`]: connection tasks and outbound queues
//! - [`pubsub`]: channel registry
//! - [`acl`]: users and password digests
//! - [`replication`]: leader state and the replica link
//! - [`config`]: runtime configuration and command line
//! - [`server`]: listener and accept loop
//!
//! ## Design Highlights
//!
//! ### One Lock, Ordered Replication
//!
//! The whole keyspace sits behind one mutex. A write command is applied and
//! propagated to replicas before the lock is released, so replicas apply
//! writes in exactly the order the leader did. `EXEC` holds the lock for its
//! entire queue.
//!
//! ### Lazy Expiry
//!
//! Keys with a TTL are checked when accessed. An expired key reads as absent
//! for `GET`, `TYPE` and `DEL`, but stays listed by `KEYS *` until a write
//! replaces it. Nothing sweeps the keyspace in the background.
//!
//! ### Bounded Fan-out
//!
//! Subscribers and replicas receive data through bounded queues. A peer
//! that stops draining is disconnected instead of stalling publishers.

pub mod acl;
pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod pubsub;
pub mod replication;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::{CommandError, CommandHandler};
pub use config::ServerConfig;
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{Frame, ParseError, RespParser, RespValue};
pub use server::Server;
pub use storage::{Keyspace, StorageEngine};

/// The default port (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// Version of redwire
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
