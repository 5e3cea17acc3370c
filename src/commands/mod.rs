//! Command Processing
//!
//! This module turns decoded request frames into replies.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  FrameReader    │  (protocol module)
//! └────────┬────────┘
//!          │ Frame
//!          ▼
//! ┌─────────────────┐      ┌──────────────────┐
//! │ CommandHandler  │<────>│  ClientSession   │  auth, MULTI queue,
//! │  (handler.rs)   │      │  (session.rs)    │  subscriptions
//! └────────┬────────┘      └──────────────────┘
//!          │
//!          ├──> data.rs ──> Keyspace        (strings, lists, zsets, geo, streams)
//!          ├──> Broker                      (PUBLISH / SUBSCRIBE)
//!          ├──> UserRegistry                (AUTH / ACL)
//!          └──> ReplicationState            (PSYNC, REPLCONF, propagation)
//! ```
//!
//! ## Supported Commands
//!
//! - Strings and keys: `SET`, `GET`, `INCR`, `DEL`, `KEYS`, `TYPE`
//! - Lists: `LPUSH`, `RPUSH`, `LPOP`, `LLEN`, `LRANGE`
//! - Sorted sets: `ZADD`, `ZRANK`, `ZRANGE`, `ZCARD`, `ZSCORE`, `ZREM`
//! - Geo: `GEOADD`, `GEOPOS`, `GEODIST`, `GEOSEARCH`
//! - Streams: `XADD`, `XRANGE`
//! - Transactions: `MULTI`, `EXEC`, `DISCARD`
//! - Pub/Sub: `SUBSCRIBE`, `UNSUBSCRIBE`, `PUBLISH`
//! - Auth: `AUTH`, `ACL SETUSER|GETUSER|WHOAMI`
//! - Replication: `REPLCONF`, `PSYNC`
//! - Server: `PING`, `ECHO`, `QUIT`, `INFO`, `CONFIG GET`, `COMMAND`

pub mod data;
pub mod error;
pub mod handler;
pub mod session;

pub use error::CommandError;
pub use handler::{CommandHandler, Outcome};
pub use session::{ClientSession, SessionKind, Transaction};
