//! Byte budget clock

use std::time::Duration;

use tokio::time::Instant;

/// Tracks when the next chunk may be released at a fixed byte rate
///
/// A chunk is due once the bytes already released would have taken their full
/// time at `bytes_per_sec`, so after `T` seconds at most `rate * T` bytes plus
/// one chunk have gone out.
#[derive(Debug, Clone)]
pub struct RateClock {
    bytes_per_sec: u64,
    anchor: Instant,
    released: u64,
}

impl RateClock {
    pub fn new(bytes_per_sec: u64) -> Self {
        Self {
            bytes_per_sec: bytes_per_sec.max(1),
            anchor: Instant::now(),
            released: 0,
        }
    }

    pub fn bytes_per_sec(&self) -> u64 {
        self.bytes_per_sec
    }

    /// Earliest instant the next chunk may be released
    pub fn next_due(&self) -> Instant {
        self.anchor + self.budget_for(self.released)
    }

    /// Account for a released chunk
    pub fn consume(&mut self, bytes: usize) {
        self.released += bytes as u64;
    }

    /// Start a new accounting window after an upstream switch
    ///
    /// Time already earned is kept, time spent waiting on a detached upstream
    /// is not turned into a burst.
    pub fn rebase(&mut self) {
        self.anchor = self.next_due().max(Instant::now());
        self.released = 0;
    }

    fn budget_for(&self, bytes: u64) -> Duration {
        let secs = bytes / self.bytes_per_sec;
        let rem = bytes % self.bytes_per_sec;
        Duration::from_secs(secs) + Duration::from_nanos(rem * 1_000_000_000 / self.bytes_per_sec)
    }
}
