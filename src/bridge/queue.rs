//! Outbound message queue between the simulation and the sender

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::protocol::{check_size, ProtocolError};

/// A fully serialized datagram, never larger than the protocol limit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    payload: Bytes,
}

impl OutboundMessage {
    pub fn new(payload: Bytes) -> Result<Self, ProtocolError> {
        check_size(payload.len())?;
        Ok(Self { payload })
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Bounded FIFO. The simulation pushes without blocking; when full, the
/// oldest entry is discarded so the consumer always sees the freshest state.
pub struct OutboundQueue {
    queue: Mutex<VecDeque<OutboundMessage>>,
    capacity: usize,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    /// Add a message; returns the entry evicted to make room, if any
    pub fn enqueue(&self, msg: OutboundMessage) -> Option<OutboundMessage> {
        let mut queue = self.queue.lock();
        let evicted = if queue.len() >= self.capacity {
            queue.pop_front()
        } else {
            None
        };
        queue.push_back(msg);
        evicted
    }

    /// Discard everything queued; returns how many entries were dropped
    pub fn clear(&self) -> usize {
        let mut queue = self.queue.lock();
        let dropped = queue.len();
        queue.clear();
        dropped
    }

    pub fn try_dequeue(&self) -> Option<OutboundMessage> {
        self.queue.lock().pop_front()
    }

    /// Take the next message, or sleep one poll interval and return None
    pub async fn dequeue_or_wait(&self, poll_interval: Duration) -> Option<OutboundMessage> {
        match self.try_dequeue() {
            Some(msg) => Some(msg),
            None => {
                tokio::time::sleep(poll_interval).await;
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
