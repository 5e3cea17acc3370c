//! Keyspace and Storage Engine
//!
//! All data lives in one [`Keyspace`]: a `HashMap` from key to a typed
//! [`Value`]. A key holds exactly one kind of value at a time; touching it
//! with an operation for another kind fails with [`StoreError::WrongType`]
//! and leaves it unchanged.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │              StorageEngine               │
//! │   Mutex<Keyspace>                        │
//! │   ┌──────────┬──────────┬──────────┐     │
//! │   │ String   │ List     │ SortedSet│ ... │
//! │   └──────────┴──────────┴──────────┘     │
//! └──────────────────────────────────────────┘
//!          ▲ lock() held for one command,
//!          │ or for a whole EXEC queue
//! ```
//!
//! A single lock makes every read-modify-write (INCR, ZADD, XADD) atomic
//! and lets a transaction observe no interleaved writes.
//!
//! ## Expiry
//!
//! Expiry is lazy. A string past its deadline reads as absent, but the key
//! stays in the map until the next write to it or an explicit `DEL`, so
//! `KEYS *` can still list it.

use crate::storage::stream::{Fields, IdRequest, Stream, StreamError, StreamId};
use crate::storage::zset::SortedSet;
use bytes::Bytes;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// A string value with an optional deadline.
#[derive(Debug, Clone)]
pub struct StringEntry {
    pub value: Bytes,
    pub expires_at: Option<Instant>,
}

impl StringEntry {
    pub fn new(value: Bytes, expires_at: Option<Instant>) -> Self {
        Self { value, expires_at }
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .map(|exp| Instant::now() >= exp)
            .unwrap_or(false)
    }
}

/// Everything a key can hold.
#[derive(Debug, Clone)]
pub enum Value {
    String(StringEntry),
    List(VecDeque<Bytes>),
    SortedSet(SortedSet),
    Stream(Stream),
}

impl Value {
    /// Name reported by `TYPE`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::SortedSet(_) => "zset",
            Value::Stream(_) => "stream",
        }
    }

    fn is_live(&self) -> bool {
        !matches!(self, Value::String(entry) if entry.is_expired())
    }
}

/// Errors raised by keyspace operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Operation against a key holding the wrong kind of value")]
    WrongType,
    #[error("value is not an integer or out of range")]
    NotInteger,
    #[error("increment or decrement would overflow")]
    Overflow,
    #[error(transparent)]
    Stream(#[from] StreamError),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Resolves `start`/`stop` (negative counts from the end) into an inclusive
/// index window over a sequence of `len` elements.
///
/// `start` is clamped to 0 and `stop` to the last element. A `stop` that is
/// still negative after adding `len` yields an empty window.
pub fn normalize_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };

    if len == 0 || stop < 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

/// The data itself. Obtain it through [`StorageEngine::lock`].
#[derive(Debug, Default)]
pub struct Keyspace {
    entries: HashMap<Bytes, Value>,
}

impl Keyspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// The value at `key`, hiding expired strings.
    pub fn get_value(&self, key: &[u8]) -> Option<&Value> {
        self.entries.get(key).filter(|value| value.is_live())
    }

    /// Drops an expired string so a write can reuse the key.
    fn reclaim(&mut self, key: &[u8]) {
        if matches!(self.entries.get(key), Some(value) if !value.is_live()) {
            self.entries.remove(key);
        }
    }

    // ========================================================================
    // Keys
    // ========================================================================

    /// Removes a key of any type. Returns true if something was removed.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Every stored key, including strings that expired but were not yet
    /// reclaimed.
    pub fn keys(&self) -> Vec<Bytes> {
        self.entries.keys().cloned().collect()
    }

    pub fn key_type(&self, key: &[u8]) -> &'static str {
        self.get_value(key).map_or("none", Value::type_name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of keys carrying a deadline.
    pub fn expires(&self) -> usize {
        self.entries
            .values()
            .filter(|v| matches!(v, Value::String(e) if e.expires_at.is_some()))
            .count()
    }

    // ========================================================================
    // Strings
    // ========================================================================

    /// Overwrites `key` with a string, whatever it held before.
    pub fn set(&mut self, key: Bytes, value: Bytes, expires_at: Option<Instant>) {
        self.entries
            .insert(key, Value::String(StringEntry::new(value, expires_at)));
    }

    pub fn get(&self, key: &[u8]) -> StoreResult<Option<Bytes>> {
        match self.get_value(key) {
            None => Ok(None),
            Some(Value::String(entry)) => Ok(Some(entry.value.clone())),
            Some(_) => Err(StoreError::WrongType),
        }
    }

    /// Increments the integer at `key`; an absent key counts as 0. The
    /// deadline of a live key is preserved.
    pub fn incr(&mut self, key: &Bytes) -> StoreResult<i64> {
        self.reclaim(key);

        let (current, expires_at) = match self.entries.get(&key[..]) {
            None => (0, None),
            Some(Value::String(entry)) => {
                let current = std::str::from_utf8(&entry.value)
                    .ok()
                    .and_then(|s| s.parse::<i64>().ok())
                    .ok_or(StoreError::NotInteger)?;
                (current, entry.expires_at)
            }
            Some(_) => return Err(StoreError::WrongType),
        };

        let next = current.checked_add(1).ok_or(StoreError::Overflow)?;
        self.entries.insert(
            key.clone(),
            Value::String(StringEntry {
                value: Bytes::from(next.to_string()),
                expires_at,
            }),
        );
        Ok(next)
    }

    // ========================================================================
    // Lists
    // ========================================================================

    fn list(&self, key: &[u8]) -> StoreResult<Option<&VecDeque<Bytes>>> {
        match self.get_value(key) {
            None => Ok(None),
            Some(Value::List(list)) => Ok(Some(list)),
            Some(_) => Err(StoreError::WrongType),
        }
    }

    fn list_or_create(&mut self, key: &Bytes) -> StoreResult<&mut VecDeque<Bytes>> {
        self.reclaim(key);
        match self
            .entries
            .entry(key.clone())
            .or_insert_with(|| Value::List(VecDeque::new()))
        {
            Value::List(list) => Ok(list),
            _ => Err(StoreError::WrongType),
        }
    }

    /// Prepends `values` so that they read left-to-right in the order given.
    pub fn lpush(&mut self, key: &Bytes, values: &[Bytes]) -> StoreResult<usize> {
        let list = self.list_or_create(key)?;
        for value in values.iter().rev() {
            list.push_front(value.clone());
        }
        Ok(list.len())
    }

    pub fn rpush(&mut self, key: &Bytes, values: &[Bytes]) -> StoreResult<usize> {
        let list = self.list_or_create(key)?;
        list.extend(values.iter().cloned());
        Ok(list.len())
    }

    /// Pops up to `count` elements from the head. `None` when the key is
    /// absent. The key is removed once the list is empty.
    pub fn lpop(&mut self, key: &[u8], count: usize) -> StoreResult<Option<Vec<Bytes>>> {
        let list = match self.entries.get_mut(key) {
            None => return Ok(None),
            Some(Value::List(list)) => list,
            Some(value) if !value.is_live() => return Ok(None),
            Some(_) => return Err(StoreError::WrongType),
        };

        let n = count.min(list.len());
        let popped: Vec<Bytes> = list.drain(..n).collect();
        if list.is_empty() {
            self.entries.remove(key);
        }
        Ok(Some(popped))
    }

    pub fn llen(&self, key: &[u8]) -> StoreResult<usize> {
        Ok(self.list(key)?.map_or(0, VecDeque::len))
    }

    pub fn lrange(&self, key: &[u8], start: i64, stop: i64) -> StoreResult<Vec<Bytes>> {
        let list = match self.list(key)? {
            Some(list) => list,
            None => return Ok(Vec::new()),
        };

        Ok(match normalize_range(list.len(), start, stop) {
            Some((start, stop)) => list.range(start..=stop).cloned().collect(),
            None => Vec::new(),
        })
    }

    // ========================================================================
    // Sorted sets
    // ========================================================================

    /// The sorted set at `key`, if any.
    pub fn sorted_set(&self, key: &[u8]) -> StoreResult<Option<&SortedSet>> {
        match self.get_value(key) {
            None => Ok(None),
            Some(Value::SortedSet(set)) => Ok(Some(set)),
            Some(_) => Err(StoreError::WrongType),
        }
    }

    /// Inserts or updates every `(score, member)` pair. Returns how many
    /// members are new.
    pub fn zadd(&mut self, key: &Bytes, pairs: Vec<(f64, Bytes)>) -> StoreResult<usize> {
        self.reclaim(key);
        let set = match self.entries.entry(key.clone()) {
            Entry::Occupied(entry) => match entry.into_mut() {
                Value::SortedSet(set) => set,
                _ => return Err(StoreError::WrongType),
            },
            Entry::Vacant(entry) => match entry.insert(Value::SortedSet(SortedSet::new())) {
                Value::SortedSet(set) => set,
                _ => return Err(StoreError::WrongType),
            },
        };

        let mut added = 0;
        for (score, member) in pairs {
            if set.insert(member, score) {
                added += 1;
            }
        }
        Ok(added)
    }

    pub fn zrem(&mut self, key: &[u8], members: &[Bytes]) -> StoreResult<usize> {
        let set = match self.entries.get_mut(key) {
            None => return Ok(0),
            Some(Value::SortedSet(set)) => set,
            Some(value) if !value.is_live() => return Ok(0),
            Some(_) => return Err(StoreError::WrongType),
        };

        let removed = members.iter().filter(|m| set.remove(m)).count();
        if set.is_empty() {
            self.entries.remove(key);
        }
        Ok(removed)
    }

    pub fn zrank(&self, key: &[u8], member: &[u8]) -> StoreResult<Option<usize>> {
        Ok(self.sorted_set(key)?.and_then(|set| set.rank(member)))
    }

    pub fn zscore(&self, key: &[u8], member: &[u8]) -> StoreResult<Option<f64>> {
        Ok(self.sorted_set(key)?.and_then(|set| set.score(member)))
    }

    pub fn zcard(&self, key: &[u8]) -> StoreResult<usize> {
        Ok(self.sorted_set(key)?.map_or(0, SortedSet::len))
    }

    pub fn zrange(&self, key: &[u8], start: i64, stop: i64) -> StoreResult<Vec<Bytes>> {
        let set = match self.sorted_set(key)? {
            Some(set) => set,
            None => return Ok(Vec::new()),
        };

        let ordered = set.ordered();
        Ok(match normalize_range(ordered.len(), start, stop) {
            Some((start, stop)) => ordered[start..=stop]
                .iter()
                .map(|(member, _)| (*member).clone())
                .collect(),
            None => Vec::new(),
        })
    }

    // ========================================================================
    // Streams
    // ========================================================================

    fn stream(&self, key: &[u8]) -> StoreResult<Option<&Stream>> {
        match self.get_value(key) {
            None => Ok(None),
            Some(Value::Stream(stream)) => Ok(Some(stream)),
            Some(_) => Err(StoreError::WrongType),
        }
    }

    /// Appends an entry. A rejected identifier leaves the keyspace untouched,
    /// including not creating the stream.
    pub fn xadd(
        &mut self,
        key: &Bytes,
        request: IdRequest,
        fields: Fields,
        now_ms: u64,
    ) -> StoreResult<StreamId> {
        self.reclaim(key);
        match self.entries.get_mut(&key[..]) {
            Some(Value::Stream(stream)) => Ok(stream.add(request, fields, now_ms)?),
            Some(_) => Err(StoreError::WrongType),
            None => {
                let mut stream = Stream::new();
                let id = stream.add(request, fields, now_ms)?;
                self.entries.insert(key.clone(), Value::Stream(stream));
                Ok(id)
            }
        }
    }

    pub fn xrange(
        &self,
        key: &[u8],
        start: StreamId,
        end: StreamId,
        count: Option<usize>,
    ) -> StoreResult<Vec<(StreamId, Fields)>> {
        Ok(match self.stream(key)? {
            Some(stream) => stream
                .range(start, end, count)
                .into_iter()
                .map(|(id, fields)| (id, fields.clone()))
                .collect(),
            None => Vec::new(),
        })
    }
}

/// Shared handle to the keyspace.
///
/// # Example
///
/// ```
/// use redwire::storage::StorageEngine;
/// use bytes::Bytes;
///
/// let engine = StorageEngine::new();
/// engine.lock().set(Bytes::from("name"), Bytes::from("Palermo"), None);
/// assert_eq!(engine.lock().get(b"name").unwrap(), Some(Bytes::from("Palermo")));
/// ```
#[derive(Debug, Default)]
pub struct StorageEngine {
    keyspace: Mutex<Keyspace>,
}

impl StorageEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the keyspace. A panic in another holder does not leave the
    /// data half-written (every operation mutates in one step), so a
    /// poisoned lock is recovered.
    pub fn lock(&self) -> MutexGuard<'_, Keyspace> {
        self.keyspace.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
