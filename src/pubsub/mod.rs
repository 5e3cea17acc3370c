//! Publish/Subscribe
//!
//! Subscriptions are tracked in two places: the [`Broker`] knows which
//! connections listen on a channel, and each session keeps its own channel
//! set so it can report counts and clean up when it disconnects.

pub mod broker;

pub use broker::Broker;
