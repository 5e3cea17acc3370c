//! Connection Handling
//!
//! One task per accepted socket. The read side decodes frames and runs them
//! through the [`CommandHandler`](crate::commands::CommandHandler); the write
//! side is a separate task draining the connection's outbound queue, which
//! the pub/sub broker and replication fan-out can also push into.
//!
//! ```text
//!              accept()
//!                 │
//!                 ▼
//! ┌──────────────────────────────────────────────────┐
//! │ ConnectionHandler                                │
//! │                                                  │
//! │  FrameReader ──> CommandHandler ──> ClientHandle │
//! │                                         │        │
//! └─────────────────────────────────────────┼────────┘
//!                                           ▼
//!                                     writer task ──> socket
//! ```

pub mod handler;
pub mod outbound;

pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
pub use outbound::{spawn_writer, ClientHandle, ClientId, QueueClosed};
