//! Channels: bounded message queues with capability transfer.
//!
//! A channel owns one incoming queue. Two channels become a connected pair
//! through the connect/accept rendezvous: the connector offers its channel
//! to a listening channel, the acceptor takes the offer and receives a
//! fresh peer channel. Once paired, a send on one end delivers into the
//! other end's queue. An unpaired channel loops sends back to itself,
//! which keeps single-object tests simple.
//!
//! Capability transfer is atomic: a queued message owns counted references
//! to every attached object, taken from the sender's table in one step and
//! handed to the receiver's table in one step.

use core_types::{ObjectId, Rights};
use std::collections::VecDeque;

/// Default queue depth for new channels.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// A message at rest inside a channel queue.
///
/// Attached capabilities are stored as (object, rights) pairs: the sender's
/// handles were consumed at enqueue time, the receiver's handles are minted
/// at dequeue time. Each pair holds one registry reference.
#[derive(Debug)]
pub struct QueuedMessage {
    pub data: Vec<u8>,
    pub caps: Vec<(ObjectId, Rights)>,
}

/// One channel endpoint.
#[derive(Debug)]
pub struct Channel {
    queue: VecDeque<QueuedMessage>,
    capacity: usize,
    peer: Option<ObjectId>,
    pending_connects: VecDeque<ObjectId>,
}

impl Channel {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            capacity,
            peer: None,
            pending_connects: VecDeque::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Enqueues a message. The caller checks fullness first; a push into a
    /// full queue reports the message back for the caller to keep.
    pub fn push(&mut self, message: QueuedMessage) -> Result<(), QueuedMessage> {
        if self.is_full() {
            return Err(message);
        }
        self.queue.push_back(message);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<QueuedMessage> {
        self.queue.pop_front()
    }

    /// Puts a message back at the head after a failed delivery.
    pub fn push_front(&mut self, message: QueuedMessage) {
        self.queue.push_front(message);
    }

    pub fn peer(&self) -> Option<ObjectId> {
        self.peer
    }

    pub fn set_peer(&mut self, peer: ObjectId) {
        self.peer = Some(peer);
    }

    pub fn clear_peer(&mut self) {
        self.peer = None;
    }

    /// Records an incoming connection offer on a listening channel.
    pub fn offer_connect(&mut self, channel: ObjectId) {
        self.pending_connects.push_back(channel);
    }

    /// Takes the oldest pending offer.
    pub fn take_connect(&mut self) -> Option<ObjectId> {
        self.pending_connects.pop_front()
    }

    pub fn has_pending_connects(&self) -> bool {
        !self.pending_connects.is_empty()
    }

    /// Empties the channel for teardown, returning queued messages (whose
    /// capability references the caller must release) and pending offers.
    pub fn drain(&mut self) -> (Vec<QueuedMessage>, Vec<ObjectId>) {
        (
            self.queue.drain(..).collect(),
            self.pending_connects.drain(..).collect(),
        )
    }
}
