use std::collections::VecDeque;
use std::sync::Mutex;

use crate::packet::Packet;

/// Packets awaiting transmission. FIFO for `push_back`; the single exception
/// is `push_front`, used by the handshake driver to put the watch-reset and
/// auth replay ahead of application packets queued before the handshake
/// finished.
///
/// API callers are the only `push_back` producers, the handshake driver the
/// only `push_front` producer, and the sender loop the only consumer.
pub(crate) struct OutgoingQueue {
    q: Mutex<VecDeque<Packet>>,
}

impl OutgoingQueue {
    pub fn new() -> Self {
        Self { q: Mutex::new(VecDeque::new()) }
    }

    pub fn push_back(&self, pkt: Packet) {
        self.q.lock().unwrap().push_back(pkt);
    }

    pub fn push_front(&self, pkt: Packet) {
        self.q.lock().unwrap().push_front(pkt);
    }

    pub fn pop_front(&self) -> Option<Packet> {
        self.q.lock().unwrap().pop_front()
    }

    /// Take everything at once; used when a disconnect fails the queue
    /// wholesale.
    pub fn drain(&self) -> Vec<Packet> {
        self.q.lock().unwrap().drain(..).collect()
    }
}

/// Packets already transmitted and awaiting a matching reply, in
/// transmission order. The sender loop is the only producer, the receiver
/// loop the only consumer.
pub(crate) struct PendingQueue {
    q: Mutex<VecDeque<Packet>>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self { q: Mutex::new(VecDeque::new()) }
    }

    pub fn push_back(&self, pkt: Packet) {
        self.q.lock().unwrap().push_back(pkt);
    }

    pub fn pop_front(&self) -> Option<Packet> {
        self.q.lock().unwrap().pop_front()
    }

    pub fn drain(&self) -> Vec<Packet> {
        self.q.lock().unwrap().drain(..).collect()
    }
}
