//! Time utilities for the streaming cadence

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Streaming rate configuration
pub const UPDATE_HZ: u32 = 30; // ~33 ms per full_update

/// Tick period for a given update rate, truncated to whole milliseconds
pub fn tick_interval(hz: u32) -> Duration {
    Duration::from_millis(1000 / u64::from(hz.max(1)))
}

/// Accumulates frame time and fires once per period.
///
/// The host frame loop runs at whatever rate the engine likes; this gate
/// turns it into a fixed-rate stream.
#[derive(Debug, Clone)]
pub struct Cadence {
    period: Duration,
    accumulator: Duration,
}

impl Cadence {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            accumulator: Duration::ZERO,
        }
    }

    /// Add elapsed frame time; true when a period has elapsed
    pub fn advance(&mut self, dt: Duration) -> bool {
        self.accumulator += dt;
        if self.accumulator >= self.period {
            self.accumulator = Duration::ZERO;
            true
        } else {
            false
        }
    }

    /// Fire on the next advance regardless of elapsed time
    pub fn force_next(&mut self) {
        self.accumulator = self.period;
    }
}
