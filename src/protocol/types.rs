//! RESP (Redis Serialization Protocol) Reply Values
//!
//! Every reply the server produces is a [`RespValue`]. Encoding is a
//! structural recursion over the variant, so nested arrays (subscription
//! acknowledgements, `ACL GETUSER`, `XRANGE`) need no special casing.
//!
//! ## Protocol Format
//!
//! Each RESP type starts with a type prefix byte:
//! - `+` Simple String
//! - `-` Error
//! - `:` Integer
//! - `$` Bulk String (`$-1` is the null bulk string)
//! - `*` Array (`*-1` is the null array)
//!
//! All types are terminated with CRLF (`\r\n`).

use bytes::Bytes;
use std::fmt;

/// The CRLF terminator used in RESP protocol
pub const CRLF: &[u8] = b"\r\n";

/// RESP protocol type prefixes
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// Represents a value in the RESP protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Status line. Cannot contain CRLF.
    /// Format: `+<string>\r\n`
    SimpleString(String),

    /// Error line; by convention the first word is the error kind.
    /// Format: `-<KIND> <message>\r\n`
    Error(String),

    /// 64-bit signed integers.
    /// Format: `:<integer>\r\n`
    Integer(i64),

    /// Binary-safe string.
    /// Format: `$<length>\r\n<data>\r\n`
    BulkString(Bytes),

    /// Null bulk string: `$-1\r\n`
    Null,

    /// Null array: `*-1\r\n`
    NullArray,

    /// Arrays can contain any RESP type, including nested arrays.
    /// Format: `*<count>\r\n<element1><element2>...`
    Array(Vec<RespValue>),
}

impl RespValue {
    /// A `+` status line.
    ///
    /// # Example
    /// ```
    /// use redwire::protocol::types::RespValue;
    /// let ok = RespValue::simple_string("OK");
    /// assert_eq!(ok.serialize(), b"+OK\r\n");
    /// ```
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    /// Builds `-<KIND> <message>`.
    ///
    /// # Example
    /// ```
    /// use redwire::protocol::types::RespValue;
    /// let err = RespValue::error_kind("NOAUTH", "Authentication required.");
    /// assert_eq!(err.serialize(), b"-NOAUTH Authentication required.\r\n");
    /// ```
    pub fn error_kind(kind: &str, message: impl fmt::Display) -> Self {
        RespValue::Error(format!("{} {}", kind, message))
    }

    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    /// `$-1`, the reply for a missing key.
    pub fn null() -> Self {
        RespValue::Null
    }

    /// `*-1`, the reply for an empty `LPOP` with a count.
    pub fn null_array() -> Self {
        RespValue::NullArray
    }

    pub fn array(values: Vec<RespValue>) -> Self {
        RespValue::Array(values)
    }

    /// An array whose elements are all bulk strings.
    pub fn bulk_array<I, B>(items: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        RespValue::Array(items.into_iter().map(RespValue::bulk_string).collect())
    }

    pub fn ok() -> Self {
        RespValue::simple_string("OK")
    }

    pub fn pong() -> Self {
        RespValue::simple_string("PONG")
    }

    /// Wire encoding of this value.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out);
        out
    }

    /// Wire encoding, ready for an outbound queue.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.serialize())
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        fn line(out: &mut Vec<u8>, tag: u8, body: &[u8]) {
            out.push(tag);
            out.extend_from_slice(body);
            out.extend_from_slice(CRLF);
        }

        match self {
            RespValue::SimpleString(s) => line(out, prefix::SIMPLE_STRING, s.as_bytes()),
            RespValue::Error(s) => line(out, prefix::ERROR, s.as_bytes()),
            RespValue::Integer(n) => line(out, prefix::INTEGER, n.to_string().as_bytes()),
            RespValue::BulkString(payload) => {
                line(out, prefix::BULK_STRING, payload.len().to_string().as_bytes());
                out.extend_from_slice(payload);
                out.extend_from_slice(CRLF);
            }
            RespValue::Null => line(out, prefix::BULK_STRING, b"-1"),
            RespValue::NullArray => line(out, prefix::ARRAY, b"-1"),
            RespValue::Array(items) => {
                line(out, prefix::ARRAY, items.len().to_string().as_bytes());
                for item in items {
                    item.encode_into(out);
                }
            }
        }
    }

    /// Exact number of bytes `serialize` will produce.
    ///
    /// Replication offsets are measured in encoded bytes, so this has to
    /// agree with `encode_into` byte for byte.
    pub fn encoded_len(&self) -> usize {
        fn digits(n: usize) -> usize {
            n.to_string().len()
        }

        match self {
            RespValue::SimpleString(s) | RespValue::Error(s) => 1 + s.len() + 2,
            RespValue::Integer(n) => 1 + n.to_string().len() + 2,
            RespValue::BulkString(data) => 1 + digits(data.len()) + 2 + data.len() + 2,
            RespValue::Null | RespValue::NullArray => 5,
            RespValue::Array(values) => {
                1 + digits(values.len()) + 2 + values.iter().map(Self::encoded_len).sum::<usize>()
            }
        }
    }

    /// Text of a status line or a UTF-8 bulk string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RespValue::SimpleString(text) => Some(text),
            RespValue::BulkString(payload) => std::str::from_utf8(payload).ok(),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[RespValue]> {
        match self {
            RespValue::Array(items) => Some(items),
            _ => None,
        }
    }
}

/// Renders values the way `redis-cli` prints them. Used in logs and error
/// messages.
impl fmt::Display for RespValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RespValue::SimpleString(text) => f.write_str(text),
            RespValue::Error(text) => write!(f, "(error) {}", text),
            RespValue::Integer(n) => write!(f, "(integer) {}", n),
            RespValue::BulkString(payload) => match std::str::from_utf8(payload) {
                Ok(text) => write!(f, "{:?}", text),
                Err(_) => write!(f, "<{} bytes>", payload.len()),
            },
            RespValue::Null | RespValue::NullArray => f.write_str("(nil)"),
            RespValue::Array(items) if items.is_empty() => f.write_str("(empty array)"),
            RespValue::Array(items) => {
                let rendered: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", rendered.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_line() {
        assert_eq!(RespValue::ok().serialize(), b"+OK\r\n");
        assert_eq!(RespValue::pong().to_bytes(), Bytes::from_static(b"+PONG\r\n"));
    }

    #[test]
    fn test_error_kind_line() {
        let value = RespValue::error_kind("WRONGTYPE", "Operation against a key");
        assert_eq!(value.serialize(), b"-WRONGTYPE Operation against a key\r\n");
    }

    #[test]
    fn test_integers() {
        assert_eq!(RespValue::integer(1000).serialize(), b":1000\r\n");
        assert_eq!(RespValue::integer(-42).serialize(), b":-42\r\n");
    }

    #[test]
    fn test_bulk_and_nulls_serialize() {
        assert_eq!(
            RespValue::bulk_string(Bytes::from("hello")).serialize(),
            b"$5\r\nhello\r\n"
        );
        assert_eq!(RespValue::null().serialize(), b"$-1\r\n");
        assert_eq!(RespValue::null_array().serialize(), b"*-1\r\n");
    }

    #[test]
    fn test_acl_getuser_shape() {
        // Shape of an ACL GETUSER reply
        let reply = RespValue::array(vec![
            RespValue::bulk_string("flags"),
            RespValue::bulk_array(["nopass"]),
            RespValue::bulk_string("passwords"),
            RespValue::array(vec![]),
        ]);
        assert_eq!(
            reply.serialize(),
            b"*4\r\n$5\r\nflags\r\n*1\r\n$6\r\nnopass\r\n$9\r\npasswords\r\n*0\r\n"
        );
    }

    #[test]
    fn test_encoded_len_matches_serialize() {
        let values = [
            RespValue::ok(),
            RespValue::error("ERR boom"),
            RespValue::integer(-12345),
            RespValue::bulk_string(Bytes::from(vec![b'x'; 1234])),
            RespValue::null(),
            RespValue::null_array(),
            RespValue::array(vec![
                RespValue::bulk_array(["REPLCONF", "GETACK", "*"]),
                RespValue::integer(7),
            ]),
        ];

        for value in values {
            assert_eq!(value.encoded_len(), value.serialize().len(), "{:?}", value);
        }
    }

    #[test]
    fn test_getack_frame_is_37_bytes() {
        let frame = RespValue::bulk_array(["REPLCONF", "GETACK", "*"]);
        assert_eq!(frame.encoded_len(), 37);
    }
}
