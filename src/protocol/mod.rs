//! RESP Protocol Implementation
//!
//! ## Modules
//!
//! - `types`: The `RespValue` reply enum and its encoder
//! - `parser`: Incremental parser for requests, replies and snapshots
//! - `frame`: Decoded request frames and the buffered `FrameReader`
//!
//! ## Example
//!
//! ```
//! use redwire::protocol::{RespParser, RespValue};
//!
//! let frame = RespParser::new()
//!     .parse_command(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n")
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(frame.name(), "GET");
//!
//! let reply = RespValue::bulk_string("Ariz");
//! assert_eq!(reply.serialize(), b"$4\r\nAriz\r\n");
//! ```

pub mod frame;
pub mod parser;
pub mod types;

pub use frame::{Frame, FrameError, FrameReader};
pub use parser::{parse_message, parse_snapshot, ParseError, ParseResult, RespParser};
pub use types::RespValue;
