//! Append-Only Streams
//!
//! Entries are kept in a `BTreeMap` keyed by [`StreamId`], which gives the
//! strictly increasing order for free and makes range scans cheap.

use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;

/// A stream entry identifier, `<ms>-<seq>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    pub const ZERO: StreamId = StreamId { ms: 0, seq: 0 };
    pub const MAX: StreamId = StreamId {
        ms: u64::MAX,
        seq: u64::MAX,
    };

    pub fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    /// Parses `<ms>-<seq>`, or `<ms>` alone which takes `default_seq`.
    pub fn parse(s: &[u8], default_seq: u64) -> Result<Self, StreamError> {
        let s = std::str::from_utf8(s).map_err(|_| StreamError::Invalid)?;
        match s.split_once('-') {
            Some((ms, seq)) => Ok(Self::new(parse_part(ms)?, parse_part(seq)?)),
            None => Ok(Self::new(parse_part(s)?, default_seq)),
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

fn parse_part(s: &str) -> Result<u64, StreamError> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(StreamError::Invalid);
    }
    s.parse().map_err(|_| StreamError::Invalid)
}

/// How XADD asked for the new identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdRequest {
    /// `*`
    Auto,
    /// `<ms>-*`
    AutoSequence(u64),
    /// `<ms>-<seq>`
    Explicit(StreamId),
}

impl IdRequest {
    pub fn parse(s: &[u8]) -> Result<Self, StreamError> {
        if s == b"*" {
            return Ok(IdRequest::Auto);
        }

        let text = std::str::from_utf8(s).map_err(|_| StreamError::Invalid)?;
        let (ms, seq) = text.split_once('-').ok_or(StreamError::Invalid)?;
        let ms = parse_part(ms)?;
        if seq == "*" {
            Ok(IdRequest::AutoSequence(ms))
        } else {
            Ok(IdRequest::Explicit(StreamId::new(ms, parse_part(seq)?)))
        }
    }
}

/// Reasons an identifier is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("The ID specified in XADD must be greater than 0-0")]
    Zero,
    #[error("The ID specified in XADD is equal or smaller than the target stream top item")]
    TooSmall,
    #[error("Invalid stream ID specified as stream command argument")]
    Invalid,
}

pub type Fields = Vec<(Bytes, Bytes)>;

#[derive(Debug, Clone, Default)]
pub struct Stream {
    entries: BTreeMap<StreamId, Fields>,
    last_id: StreamId,
}

impl Stream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_id(&self) -> StreamId {
        self.last_id
    }

    /// Resolves the identifier the next entry would get.
    pub fn next_id(&self, request: IdRequest, now_ms: u64) -> Result<StreamId, StreamError> {
        let last = self.last_id;
        let id = match request {
            IdRequest::Auto => {
                let ms = now_ms.max(last.ms);
                self.sequence_for(ms)
            }
            IdRequest::AutoSequence(ms) => {
                if ms < last.ms {
                    return Err(StreamError::TooSmall);
                }
                self.sequence_for(ms)
            }
            IdRequest::Explicit(id) => id,
        };

        if id == StreamId::ZERO {
            return Err(StreamError::Zero);
        }
        if id <= last {
            return Err(StreamError::TooSmall);
        }
        Ok(id)
    }

    fn sequence_for(&self, ms: u64) -> StreamId {
        if ms == self.last_id.ms {
            StreamId::new(ms, self.last_id.seq.saturating_add(1))
        } else if ms == 0 {
            StreamId::new(0, 1)
        } else {
            StreamId::new(ms, 0)
        }
    }

    /// Appends an entry, returning its identifier.
    pub fn add(
        &mut self,
        request: IdRequest,
        fields: Fields,
        now_ms: u64,
    ) -> Result<StreamId, StreamError> {
        let id = self.next_id(request, now_ms)?;
        self.entries.insert(id, fields);
        self.last_id = id;
        Ok(id)
    }

    /// Entries with `start <= id <= end`, at most `count` of them.
    pub fn range(
        &self,
        start: StreamId,
        end: StreamId,
        count: Option<usize>,
    ) -> Vec<(StreamId, &Fields)> {
        if start > end {
            return Vec::new();
        }
        self.entries
            .range((Bound::Included(start), Bound::Included(end)))
            .take(count.unwrap_or(usize::MAX))
            .map(|(id, fields)| (*id, fields))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> Fields {
        vec![(Bytes::from("f"), Bytes::from("v"))]
    }

    fn explicit(ms: u64, seq: u64) -> IdRequest {
        IdRequest::Explicit(StreamId::new(ms, seq))
    }

    #[test]
    fn test_parse_requests() {
        assert_eq!(IdRequest::parse(b"*").unwrap(), IdRequest::Auto);
        assert_eq!(IdRequest::parse(b"5-*").unwrap(), IdRequest::AutoSequence(5));
        assert_eq!(IdRequest::parse(b"5-3").unwrap(), explicit(5, 3));
        assert_eq!(IdRequest::parse(b"5"), Err(StreamError::Invalid));
        assert_eq!(IdRequest::parse(b"-1-2"), Err(StreamError::Invalid));
        assert_eq!(IdRequest::parse(b"5--1"), Err(StreamError::Invalid));
        assert_eq!(IdRequest::parse(b"a-b"), Err(StreamError::Invalid));
    }

    #[test]
    fn test_explicit_ids_must_increase() {
        let mut stream = Stream::new();
        assert_eq!(stream.add(explicit(5, 1), fields(), 0), Ok(StreamId::new(5, 1)));
        assert_eq!(stream.add(explicit(5, 1), fields(), 0), Err(StreamError::TooSmall));
        assert_eq!(stream.add(explicit(4, 9), fields(), 0), Err(StreamError::TooSmall));
        assert_eq!(stream.len(), 1);
    }

    #[test]
    fn test_zero_id_is_rejected() {
        let mut stream = Stream::new();
        assert_eq!(stream.add(explicit(0, 0), fields(), 0), Err(StreamError::Zero));
        assert!(stream.is_empty());
    }

    #[test]
    fn test_auto_sequence() {
        let mut stream = Stream::new();
        assert_eq!(
            stream.add(IdRequest::AutoSequence(0), fields(), 0),
            Ok(StreamId::new(0, 1))
        );

        stream.add(explicit(5, 1), fields(), 0).unwrap();
        assert_eq!(
            stream.add(IdRequest::AutoSequence(5), fields(), 0),
            Ok(StreamId::new(5, 2))
        );
        assert_eq!(
            stream.add(IdRequest::AutoSequence(7), fields(), 0),
            Ok(StreamId::new(7, 0))
        );
        assert_eq!(
            stream.add(IdRequest::AutoSequence(6), fields(), 0),
            Err(StreamError::TooSmall)
        );
    }

    #[test]
    fn test_full_auto() {
        let mut stream = Stream::new();
        assert_eq!(stream.add(IdRequest::Auto, fields(), 1000), Ok(StreamId::new(1000, 0)));
        assert_eq!(stream.add(IdRequest::Auto, fields(), 1000), Ok(StreamId::new(1000, 1)));
        // Clock went backwards: stay on the last millisecond.
        assert_eq!(stream.add(IdRequest::Auto, fields(), 900), Ok(StreamId::new(1000, 2)));
        assert_eq!(stream.add(IdRequest::Auto, fields(), 1001), Ok(StreamId::new(1001, 0)));
    }

    #[test]
    fn test_range() {
        let mut stream = Stream::new();
        for (ms, seq) in [(1, 0), (1, 1), (2, 0), (3, 5)] {
            stream.add(explicit(ms, seq), fields(), 0).unwrap();
        }

        let ids = |v: Vec<(StreamId, &Fields)>| v.into_iter().map(|(id, _)| id.to_string()).collect::<Vec<_>>();

        assert_eq!(
            ids(stream.range(StreamId::ZERO, StreamId::MAX, None)),
            vec!["1-0", "1-1", "2-0", "3-5"]
        );
        assert_eq!(
            ids(stream.range(StreamId::new(1, 1), StreamId::new(2, u64::MAX), None)),
            vec!["1-1", "2-0"]
        );
        assert_eq!(ids(stream.range(StreamId::ZERO, StreamId::MAX, Some(1))), vec!["1-0"]);
        assert!(stream.range(StreamId::new(3, 0), StreamId::new(2, 0), None).is_empty());
    }

    #[test]
    fn test_parse_range_bound() {
        assert_eq!(StreamId::parse(b"5", 0).unwrap(), StreamId::new(5, 0));
        assert_eq!(StreamId::parse(b"5", u64::MAX).unwrap(), StreamId::new(5, u64::MAX));
        assert_eq!(StreamId::parse(b"5-2", 0).unwrap(), StreamId::new(5, 2));
        assert!(StreamId::parse(b"x", 0).is_err());
    }
}
