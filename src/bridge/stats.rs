//! Stream statistics for debugging

/// Counters kept by the sender and the simulation link
#[derive(Debug, Default, Clone)]
pub struct StreamStats {
    pub messages_sent: u64,
    pub bytes_sent: u64,
    pub send_errors: u64,
    /// Oldest entries discarded because the queue was full
    pub overflow_drops: u64,
    /// Snapshots that serialized above the datagram limit
    pub oversize_drops: u64,
    /// Updates queued during the handshake and discarded once it completed
    pub stale_drops: u64,
    pub avg_message_bytes: f32,
}

impl StreamStats {
    pub fn record_sent(&mut self, bytes: usize) {
        self.messages_sent += 1;
        self.bytes_sent += bytes as u64;

        // Running average
        let n = self.messages_sent as f32;
        self.avg_message_bytes = self.avg_message_bytes * ((n - 1.0) / n) + (bytes as f32 / n);
    }
}
