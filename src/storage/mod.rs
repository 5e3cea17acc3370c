//! Storage Engine Module
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                 StorageEngine                 │
//! │                Mutex<Keyspace>                │
//! │                                               │
//! │   key ──> Value::String   (lazy expiry)       │
//! │   key ──> Value::List     (VecDeque)          │
//! │   key ──> Value::SortedSet ──┐                │
//! │   key ──> Value::Stream      │ geo scores     │
//! └──────────────────────────────┼────────────────┘
//!                                ▼
//!                         geo (pure functions)
//! ```
//!
//! - `engine`: the keyspace, its typed values and the shared lock
//! - `zset`: sorted sets ordered by `(score, member)`
//! - `stream`: append-only streams and identifier generation
//! - `geo`: geohash encoding and haversine distance

pub mod engine;
pub mod geo;
pub mod stream;
pub mod zset;

pub use engine::{normalize_range, Keyspace, StorageEngine, StoreError, StoreResult, Value};
pub use stream::{IdRequest, StreamError, StreamId};
pub use zset::SortedSet;
