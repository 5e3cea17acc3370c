//! Channel Registry and Fan-Out
//!
//! The broker maps channel names to the outbound handles of their
//! subscribers. Publishing encodes the `message` notification once and
//! pushes it into each subscriber's queue without waiting; a subscriber
//! whose queue is full is evicted and dropped from the channel.

use crate::connection::outbound::{ClientHandle, ClientId};
use crate::protocol::RespValue;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

type Subscribers = HashMap<ClientId, ClientHandle>;

#[derive(Debug, Default)]
pub struct Broker {
    channels: Mutex<HashMap<Bytes, Subscribers>>,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<Bytes, Subscribers>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds `client` to `channel`. Subscribing twice is a no-op.
    pub fn subscribe(&self, channel: Bytes, client: &ClientHandle) {
        self.channels()
            .entry(channel)
            .or_default()
            .entry(client.id())
            .or_insert_with(|| client.clone());
    }

    /// Removes `client` from `channel`, dropping the channel once empty.
    pub fn unsubscribe(&self, channel: &[u8], client: ClientId) {
        let mut channels = self.channels();
        if let Some(subscribers) = channels.get_mut(channel) {
            subscribers.remove(&client);
            if subscribers.is_empty() {
                channels.remove(channel);
            }
        }
    }

    /// Delivers `[message, channel, payload]` to every subscriber and
    /// returns how many accepted it.
    pub fn publish(&self, channel: &[u8], payload: Bytes) -> usize {
        let notification = RespValue::array(vec![
            RespValue::bulk_string("message"),
            RespValue::bulk_string(Bytes::copy_from_slice(channel)),
            RespValue::bulk_string(payload),
        ])
        .to_bytes();

        let mut channels = self.channels();
        let subscribers = match channels.get_mut(channel) {
            Some(subscribers) => subscribers,
            None => return 0,
        };

        let before = subscribers.len();
        subscribers.retain(|_, handle| handle.try_deliver(notification.clone()));
        let delivered = subscribers.len();

        if delivered < before {
            debug!(dropped = before - delivered, "Dropped subscribers that could not keep up");
        }
        if subscribers.is_empty() {
            channels.remove(channel);
        }
        delivered
    }

    /// Number of subscribers on `channel`.
    pub fn subscriber_count(&self, channel: &[u8]) -> usize {
        self.channels().get(channel).map_or(0, HashMap::len)
    }

    /// Number of channels with at least one subscriber.
    pub fn channel_count(&self) -> usize {
        self.channels().len()
    }
}
