//! Per-Connection Session State
//!
//! A [`ClientSession`] is owned by exactly one connection task and passed by
//! `&mut` into every command it executes. It carries authentication, the
//! transaction queue and the connection's own view of its subscriptions.

use crate::acl::DEFAULT_USER;
use crate::connection::outbound::{ClientHandle, ClientId};
use crate::protocol::Frame;
use bytes::Bytes;
use std::collections::BTreeSet;

/// What is on the other end of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// An ordinary client.
    Client,
    /// A replica that completed `PSYNC` on this leader.
    Replica,
    /// This server's link to its own leader.
    LeaderLink,
}

/// Transaction state machine: `Normal --MULTI--> Queuing --EXEC|DISCARD--> Normal`.
#[derive(Debug, Default)]
pub enum Transaction {
    #[default]
    Normal,
    Queuing(Vec<Frame>),
}

#[derive(Debug)]
pub struct ClientSession {
    pub id: ClientId,
    pub kind: SessionKind,
    pub authenticated: bool,
    pub username: String,
    pub channels: BTreeSet<Bytes>,
    pub transaction: Transaction,
    pub outbound: ClientHandle,
    /// Port announced with `REPLCONF listening-port`.
    pub listening_port: Option<u16>,
}

impl ClientSession {
    pub fn new(kind: SessionKind, outbound: ClientHandle, authenticated: bool) -> Self {
        Self {
            id: outbound.id(),
            kind,
            authenticated,
            username: DEFAULT_USER.to_string(),
            channels: BTreeSet::new(),
            transaction: Transaction::Normal,
            outbound,
            listening_port: None,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        !self.channels.is_empty()
    }

    pub fn is_queuing(&self) -> bool {
        matches!(self.transaction, Transaction::Queuing(_))
    }

    /// Enters `Queuing` with an empty queue. False if already queuing.
    pub fn begin(&mut self) -> bool {
        if self.is_queuing() {
            return false;
        }
        self.transaction = Transaction::Queuing(Vec::new());
        true
    }

    /// Appends to the queue. No-op outside a transaction.
    pub fn queue(&mut self, frame: Frame) {
        if let Transaction::Queuing(queue) = &mut self.transaction {
            queue.push(frame);
        }
    }

    /// Leaves `Queuing`, returning the queued frames in arrival order.
    pub fn take_queue(&mut self) -> Option<Vec<Frame>> {
        match std::mem::take(&mut self.transaction) {
            Transaction::Queuing(queue) => Some(queue),
            Transaction::Normal => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> ClientSession {
        let (handle, _rx) = ClientHandle::channel(4);
        ClientSession::new(SessionKind::Client, handle, true)
    }

    #[test]
    fn test_transaction_lifecycle() {
        let mut s = session();
        assert!(s.take_queue().is_none());

        assert!(s.begin());
        assert!(!s.begin());
        s.queue(Frame::from_strs(&["SET", "a", "1"]));
        s.queue(Frame::from_strs(&["INCR", "a"]));

        let queue = s.take_queue().unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue[1].name(), "INCR");
        assert!(!s.is_queuing());
    }

    #[test]
    fn test_queue_outside_transaction_is_ignored() {
        let mut s = session();
        s.queue(Frame::from_strs(&["PING"]));
        assert!(s.take_queue().is_none());
        assert_eq!(s.username, "default");
    }
}
