//! Request Frames and the Buffered Frame Reader
//!
//! A [`Frame`] is one decoded request: the command name followed by its
//! arguments, plus the number of bytes it occupied on the wire. The wire
//! length is what replicas add to their offset, so it is carried alongside
//! the arguments instead of being recomputed.
//!
//! [`FrameReader`] owns a read buffer over any `AsyncRead`. TCP is a stream
//! protocol, so a single read may contain half a frame or several frames;
//! the reader keeps whatever it has not consumed for the next call.

use crate::protocol::parser::{parse_snapshot, ParseError, RespParser, MAX_BULK_SIZE};
use crate::protocol::types::RespValue;
use bytes::{Buf, Bytes, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

/// Buffered bytes allowed before a peer is considered abusive: one maximal
/// bulk string plus framing.
const MAX_BUFFER_SIZE: usize = MAX_BULK_SIZE + 64 * 1024;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// A decoded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    parts: Vec<Bytes>,
    wire_len: usize,
}

impl Frame {
    /// Builds a frame from its parts, computing the canonical encoded length.
    pub fn new(parts: Vec<Bytes>) -> Self {
        let wire_len = encoded_len(&parts);
        Self { parts, wire_len }
    }

    /// Builds a frame that was read off the wire in `wire_len` bytes.
    pub(crate) fn from_wire(parts: Vec<Bytes>, wire_len: usize) -> Self {
        Self { parts, wire_len }
    }

    /// Convenience constructor used by tests and the replica handshake.
    pub fn from_strs(parts: &[&str]) -> Self {
        Self::new(
            parts
                .iter()
                .map(|p| Bytes::copy_from_slice(p.as_bytes()))
                .collect(),
        )
    }

    /// Upper-cased command name, empty for an empty frame.
    pub fn name(&self) -> String {
        self.parts
            .first()
            .map(|name| String::from_utf8_lossy(name).to_ascii_uppercase())
            .unwrap_or_default()
    }

    /// Arguments after the command name.
    pub fn args(&self) -> &[Bytes] {
        self.parts.get(1..).unwrap_or(&[])
    }

    /// Command name and arguments.
    pub fn parts(&self) -> &[Bytes] {
        &self.parts
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Bytes this frame occupied when it was received.
    pub fn wire_len(&self) -> usize {
        self.wire_len
    }

    /// Replaces one argument (0 is the command name) and refreshes the
    /// canonical length.
    pub fn with_part(mut self, index: usize, value: Bytes) -> Self {
        if let Some(slot) = self.parts.get_mut(index) {
            *slot = value;
        }
        self.wire_len = encoded_len(&self.parts);
        self
    }

    /// Encodes as an array of bulk strings.
    pub fn to_resp(&self) -> RespValue {
        RespValue::bulk_array(self.parts.iter().cloned())
    }

    /// Canonical array-of-bulk-strings encoding.
    pub fn encode(&self) -> Bytes {
        self.to_resp().to_bytes()
    }
}

fn encoded_len(parts: &[Bytes]) -> usize {
    let header = 1 + parts.len().to_string().len() + 2;
    header
        + parts
            .iter()
            .map(|p| 1 + p.len().to_string().len() + 2 + p.len() + 2)
            .sum::<usize>()
}

/// Errors produced while reading frames from a peer.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer sent bytes that are not valid RESP
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// The peer closed the stream between frames
    #[error("Connection closed")]
    Closed,

    /// The peer closed the stream in the middle of a frame
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// Buffer size limit exceeded
    #[error("Buffer size limit exceeded")]
    BufferFull,
}

/// Reads frames, reply values and snapshots from a byte stream.
///
/// Every `read_*` method is cancel safe: bytes are only appended to the
/// internal buffer when a read completes, and nothing is consumed until a
/// whole item has been parsed.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    buffer: BytesMut,
    parser: RespParser,
    bytes_read: u64,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            parser: RespParser::new(),
            bytes_read: 0,
        }
    }

    /// Total bytes pulled from the underlying stream.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Reads the next request frame.
    pub async fn read_frame(&mut self) -> Result<Frame, FrameError> {
        loop {
            if let Some(frame) = self.parser.parse_command(&self.buffer)? {
                self.buffer.advance(frame.wire_len());
                trace!(
                    consumed = frame.wire_len(),
                    remaining = self.buffer.len(),
                    "Parsed frame"
                );
                return Ok(frame);
            }
            self.fill().await?;
        }
    }

    /// Reads the next RESP value of any type.
    pub async fn read_value(&mut self) -> Result<RespValue, FrameError> {
        loop {
            if let Some((value, consumed)) = self.parser.parse(&self.buffer)? {
                self.buffer.advance(consumed);
                return Ok(value);
            }
            self.fill().await?;
        }
    }

    /// Reads a `$<len>\r\n<payload>` snapshot transfer.
    pub async fn read_snapshot(&mut self) -> Result<Bytes, FrameError> {
        loop {
            if let Some((payload, consumed)) = parse_snapshot(&self.buffer)? {
                self.buffer.advance(consumed);
                return Ok(payload);
            }
            self.fill().await?;
        }
    }

    async fn fill(&mut self) -> Result<(), FrameError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            return Err(FrameError::BufferFull);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(INITIAL_BUFFER_SIZE);
        }

        let n = self.inner.read_buf(&mut self.buffer).await?;
        if n == 0 {
            return Err(if self.buffer.is_empty() {
                FrameError::Closed
            } else {
                FrameError::UnexpectedEof
            });
        }

        self.bytes_read += n as u64;
        trace!(bytes = n, "Read data");
        Ok(())
    }
}
