//! Incremental RESP Parser
//!
//! The parser works on a borrowed byte buffer and never blocks. Every entry
//! point returns one of:
//! - `Ok(Some((value, consumed)))` - a complete value, `consumed` bytes were used
//! - `Ok(None)` - the message is incomplete, read more and try again
//! - `Err(ParseError)` - the bytes are not valid RESP; the peer should be dropped
//!
//! Three shapes are recognised:
//!
//! 1. Any RESP value (`parse`), used when reading replies from a leader
//!    during the replication handshake.
//! 2. A request (`parse_command`): an array of bulk strings, or an inline
//!    command line. The byte count of the whole frame is preserved because
//!    replication offsets are measured in request bytes.
//! 3. A snapshot payload (`parse_snapshot`): `$<len>\r\n` followed by exactly
//!    `len` bytes and no trailing CRLF.

use crate::protocol::frame::Frame;
use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::Bytes;
use std::num::ParseIntError;
use thiserror::Error;

/// Why a buffer could not be decoded.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// Unparsable number in a header or integer reply
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Status or error line that is not UTF-8
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Bulk length below -1
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// Array count below -1
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// Protocol violation (missing CRLF, wrong element type, etc.)
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// Declared bulk length over `MAX_BULK_SIZE`
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Deepest array nesting accepted
pub const MAX_NESTING_DEPTH: usize = 32;

/// Maximum number of elements in a single request
pub const MAX_REQUEST_ARGS: usize = 1024 * 1024;

/// An incremental RESP parser.
///
/// # Example
///
/// ```
/// use redwire::protocol::parser::RespParser;
///
/// let mut parser = RespParser::new();
/// let buf = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
///
/// let frame = parser.parse_command(buf).unwrap().unwrap();
/// assert_eq!(frame.name(), "GET");
/// assert_eq!(frame.wire_len(), buf.len());
/// ```
#[derive(Debug, Default)]
pub struct RespParser {
    /// Depth of the array currently being parsed
    depth: usize,
}

impl RespParser {
    pub fn new() -> Self {
        Self { depth: 0 }
    }

    /// Attempts to parse any RESP value from the buffer.
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        self.depth = 0;
        self.parse_value(buf)
    }

    /// Attempts to parse one request frame from the buffer.
    ///
    /// Requests are either `*<n>` followed by `n` bulk strings, or an inline
    /// line of whitespace-separated words. Anything else inside a request
    /// array (integers, nested arrays, null bulk strings) is a protocol error.
    pub fn parse_command(&mut self, buf: &[u8]) -> ParseResult<Option<Frame>> {
        if buf.is_empty() {
            return Ok(None);
        }

        if buf[0] != prefix::ARRAY {
            return Ok(parse_inline(buf)?.map(|(args, consumed)| Frame::from_wire(args, consumed)));
        }

        let (count, mut consumed) = match parse_length_line(buf)? {
            Some(line) => line,
            None => return Ok(None),
        };

        if count < 0 {
            return Err(ParseError::InvalidArrayLength(count));
        }
        let count = count as usize;
        if count > MAX_REQUEST_ARGS {
            return Err(ParseError::MessageTooLarge {
                size: count,
                max: MAX_REQUEST_ARGS,
            });
        }

        let mut args = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let rest = &buf[consumed..];
            if rest.is_empty() {
                return Ok(None);
            }
            if rest[0] != prefix::BULK_STRING {
                return Err(ParseError::ProtocolError(format!(
                    "expected '$', got '{}'",
                    rest[0] as char
                )));
            }

            match parse_bulk(rest)? {
                Some((Some(data), used)) => {
                    args.push(data);
                    consumed += used;
                }
                Some((None, _)) => {
                    return Err(ParseError::ProtocolError(
                        "null bulk string in request".to_string(),
                    ))
                }
                None => return Ok(None),
            }
        }

        Ok(Some(Frame::from_wire(args, consumed)))
    }

    fn parse_value(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }

        if self.depth > MAX_NESTING_DEPTH {
            return Err(ParseError::ProtocolError(format!(
                "maximum nesting depth exceeded: {}",
                MAX_NESTING_DEPTH
            )));
        }

        match buf[0] {
            prefix::SIMPLE_STRING => parse_line(buf, RespValue::SimpleString),
            prefix::ERROR => parse_line(buf, RespValue::Error),
            prefix::INTEGER => self.parse_integer(buf),
            prefix::BULK_STRING => Ok(parse_bulk(buf)?.map(|(data, consumed)| {
                let value = data.map_or(RespValue::Null, RespValue::BulkString);
                (value, consumed)
            })),
            prefix::ARRAY => self.parse_array(buf),
            _ => Ok(parse_inline(buf)?.map(|(args, consumed)| {
                let values = args.into_iter().map(RespValue::BulkString).collect();
                (RespValue::Array(values), consumed)
            })),
        }
    }

    /// Parses an integer: `:<integer>\r\n`
    fn parse_integer(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        Ok(parse_length_line(buf)?.map(|(n, consumed)| (RespValue::Integer(n), consumed)))
    }

    /// Parses an array: `*<count>\r\n<elements...>`
    fn parse_array(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let (count, mut consumed) = match parse_length_line(buf)? {
            Some(line) => line,
            None => return Ok(None),
        };

        if count == -1 {
            return Ok(Some((RespValue::NullArray, consumed)));
        }
        if count < 0 {
            return Err(ParseError::InvalidArrayLength(count));
        }

        let count = count as usize;
        let mut elements = Vec::with_capacity(count.min(1024));

        self.depth += 1;
        for _ in 0..count {
            if consumed >= buf.len() {
                self.depth -= 1;
                return Ok(None);
            }

            match self.parse_value(&buf[consumed..])? {
                Some((value, used)) => {
                    elements.push(value);
                    consumed += used;
                }
                None => {
                    self.depth -= 1;
                    return Ok(None);
                }
            }
        }
        self.depth -= 1;

        Ok(Some((RespValue::Array(elements), consumed)))
    }
}

/// Parses a snapshot transfer: `$<len>\r\n<len bytes>`, with no trailing CRLF.
///
/// Returns the payload and the number of bytes consumed.
pub fn parse_snapshot(buf: &[u8]) -> ParseResult<Option<(Bytes, usize)>> {
    if buf.is_empty() {
        return Ok(None);
    }
    if buf[0] != prefix::BULK_STRING {
        return Err(ParseError::ProtocolError(format!(
            "expected snapshot header '$', got '{}'",
            buf[0] as char
        )));
    }

    let (len, header) = match parse_length_line(buf)? {
        Some(line) => line,
        None => return Ok(None),
    };
    if len < 0 {
        return Err(ParseError::InvalidBulkLength(len));
    }
    let len = len as usize;
    if len > MAX_BULK_SIZE {
        return Err(ParseError::MessageTooLarge {
            size: len,
            max: MAX_BULK_SIZE,
        });
    }

    if buf.len() < header + len {
        return Ok(None);
    }

    let payload = Bytes::copy_from_slice(&buf[header..header + len]);
    Ok(Some((payload, header + len)))
}

/// Helper function to parse a single RESP value from bytes.
pub fn parse_message(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    RespParser::new().parse(buf)
}

/// Parses `+...\r\n` or `-...\r\n` into the given variant.
fn parse_line(
    buf: &[u8],
    make: fn(String) -> RespValue,
) -> ParseResult<Option<(RespValue, usize)>> {
    match find_crlf(&buf[1..]) {
        Some(pos) => {
            let s = std::str::from_utf8(&buf[1..1 + pos])
                .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;
            Ok(Some((make(s.to_string()), 1 + pos + 2)))
        }
        None => Ok(None),
    }
}

/// Parses the `<prefix><integer>\r\n` header shared by integers, bulk
/// strings and arrays. Returns the integer and the header length.
fn parse_length_line(buf: &[u8]) -> ParseResult<Option<(i64, usize)>> {
    let end = match find_crlf(&buf[1..]) {
        Some(pos) => pos,
        None => return Ok(None),
    };

    let text = std::str::from_utf8(&buf[1..1 + end])
        .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;
    let n: i64 = text
        .parse()
        .map_err(|e: ParseIntError| ParseError::InvalidInteger(format!("{:?}: {}", text, e)))?;

    Ok(Some((n, 1 + end + 2)))
}

/// Parses a bulk string. `None` inside the tuple is the null bulk string.
fn parse_bulk(buf: &[u8]) -> ParseResult<Option<(Option<Bytes>, usize)>> {
    let (length, header) = match parse_length_line(buf)? {
        Some(line) => line,
        None => return Ok(None),
    };

    if length == -1 {
        return Ok(Some((None, header)));
    }
    if length < 0 {
        return Err(ParseError::InvalidBulkLength(length));
    }

    let length = length as usize;
    if length > MAX_BULK_SIZE {
        return Err(ParseError::MessageTooLarge {
            size: length,
            max: MAX_BULK_SIZE,
        });
    }

    let total = header + length + 2;
    if buf.len() < total {
        return Ok(None);
    }

    if &buf[header + length..total] != CRLF {
        return Err(ParseError::ProtocolError(
            "bulk string missing trailing CRLF".to_string(),
        ));
    }

    let data = Bytes::copy_from_slice(&buf[header..header + length]);
    Ok(Some((Some(data), total)))
}

/// Parses an inline command line such as `PING\r\n`.
fn parse_inline(buf: &[u8]) -> ParseResult<Option<(Vec<Bytes>, usize)>> {
    let crlf_pos = match find_crlf(buf) {
        Some(pos) => pos,
        None => return Ok(None),
    };

    let line = std::str::from_utf8(&buf[..crlf_pos])
        .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;

    let args: Vec<Bytes> = line
        .split_whitespace()
        .map(|s| Bytes::copy_from_slice(s.as_bytes()))
        .collect();
    if args.is_empty() {
        return Err(ParseError::ProtocolError(
            "empty inline command".to_string(),
        ));
    }

    Ok(Some((args, crlf_pos + 2)))
}

/// Index of the first CRLF.
///
/// Returns the position of `\r` if found.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_reply() {
        let (value, consumed) = parse_message(b"+OK\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::SimpleString("OK".to_string()));
        assert_eq!(consumed, 5);
    }

    #[test]
    fn test_parse_incomplete() {
        assert!(parse_message(b"+OK").unwrap().is_none());
        assert!(parse_message(b"$5\r\nhel").unwrap().is_none());
        assert!(parse_message(b"*2\r\n:1\r\n").unwrap().is_none());
    }

    #[test]
    fn test_parse_error() {
        let (value, consumed) = parse_message(b"-ERR unknown command\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::Error("ERR unknown command".to_string()));
        assert_eq!(consumed, 22);
    }

    #[test]
    fn test_parse_integer() {
        let (value, _) = parse_message(b":-42\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::Integer(-42));
    }

    #[test]
    fn test_parse_nulls() {
        assert_eq!(parse_message(b"$-1\r\n").unwrap().unwrap(), (RespValue::Null, 5));
        assert_eq!(
            parse_message(b"*-1\r\n").unwrap().unwrap(),
            (RespValue::NullArray, 5)
        );
    }

    #[test]
    fn test_nested_arrays() {
        let (value, _) = parse_message(b"*2\r\n:1\r\n*2\r\n:2\r\n:3\r\n").unwrap().unwrap();
        assert_eq!(
            value,
            RespValue::Array(vec![
                RespValue::Integer(1),
                RespValue::Array(vec![RespValue::Integer(2), RespValue::Integer(3)]),
            ])
        );
    }

    #[test]
    fn test_bad_integer_reply() {
        let result = parse_message(b":not_a_number\r\n");
        assert!(matches!(result, Err(ParseError::InvalidInteger(_))));
    }

    #[test]
    fn test_parse_command_counts_every_byte() {
        let input = b"*3\r\n$3\r\nSET\r\n$8\r\nuser:101\r\n$4\r\nAriz\r\n";
        let frame = RespParser::new().parse_command(input).unwrap().unwrap();
        assert_eq!(frame.name(), "SET");
        assert_eq!(frame.args(), &[Bytes::from("user:101"), Bytes::from("Ariz")]);
        assert_eq!(frame.wire_len(), input.len());
    }

    #[test]
    fn test_parse_command_pipelined() {
        let input = b"*1\r\n$4\r\nPING\r\n*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n";
        let mut parser = RespParser::new();

        let first = parser.parse_command(input).unwrap().unwrap();
        assert_eq!(first.name(), "PING");
        assert_eq!(first.wire_len(), 14);

        let second = parser.parse_command(&input[14..]).unwrap().unwrap();
        assert_eq!(second.name(), "ECHO");
        assert_eq!(second.wire_len(), input.len() - 14);
    }

    #[test]
    fn test_parse_command_partial() {
        let input = b"*2\r\n$4\r\nECHO\r\n$5\r\nhel";
        assert!(RespParser::new().parse_command(input).unwrap().is_none());
    }

    #[test]
    fn test_parse_command_rejects_non_bulk_elements() {
        let result = RespParser::new().parse_command(b"*1\r\n:5\r\n");
        assert!(matches!(result, Err(ParseError::ProtocolError(_))));

        let result = RespParser::new().parse_command(b"*1\r\n$-1\r\n");
        assert!(matches!(result, Err(ParseError::ProtocolError(_))));
    }

    #[test]
    fn test_parse_command_bad_count() {
        let result = RespParser::new().parse_command(b"*x\r\n");
        assert!(matches!(result, Err(ParseError::InvalidInteger(_))));

        let result = RespParser::new().parse_command(b"*-3\r\n");
        assert!(matches!(result, Err(ParseError::InvalidArrayLength(-3))));
    }

    #[test]
    fn test_inline_command_splits_on_whitespace() {
        let frame = RespParser::new().parse_command(b"ping  hello\r\n").unwrap().unwrap();
        assert_eq!(frame.name(), "PING");
        assert_eq!(frame.args(), &[Bytes::from("hello")]);
        assert_eq!(frame.wire_len(), 13);
    }

    #[test]
    fn test_bulk_payload_may_contain_crlf() {
        let frame = RespParser::new()
            .parse_command(b"*2\r\n$4\r\nECHO\r\n$7\r\nhe\r\nl\x00o\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(frame.args()[0], Bytes::from(&b"he\r\nl\x00o"[..]));
    }

    #[test]
    fn test_large_declared_count_waits_for_payload() {
        let mut parser = RespParser::new();
        assert_eq!(parser.parse_command(b"*1048576\r\n").unwrap(), None);
        assert_eq!(parser.parse_command(b"*1048576\r\n$3\r\nSET\r\n").unwrap(), None);
    }

    #[test]
    fn test_parse_snapshot_without_trailing_crlf() {
        let input = b"$5\r\nREDIS*1\r\n$4\r\nPING\r\n";
        let (payload, consumed) = parse_snapshot(input).unwrap().unwrap();
        assert_eq!(payload, Bytes::from("REDIS"));
        assert_eq!(consumed, 9);
        assert_eq!(&input[consumed..], b"*1\r\n$4\r\nPING\r\n");
    }

    #[test]
    fn test_parse_snapshot_incomplete_and_malformed() {
        assert!(parse_snapshot(b"$10\r\nREDIS").unwrap().is_none());
        assert!(parse_snapshot(b"+OK\r\n").is_err());
    }
}
