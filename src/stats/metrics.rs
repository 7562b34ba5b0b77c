//! Statistics for the broadcast path

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Point-in-time view of the broadcast counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Chunks fanned out
    pub chunks: u64,
    /// Bytes fanned out (counted once per chunk, not per listener)
    pub bytes: u64,
    /// Successful chunk deliveries summed over listeners
    pub deliveries: u64,
    /// Listeners removed because their sink closed or stalled
    pub pruned: u64,
    /// Time since the counters were created
    pub uptime: Duration,
}

impl BroadcastStats {
    /// Average paced bitrate over the uptime (bits/sec)
    pub fn bitrate(&self) -> u64 {
        let secs = self.uptime.as_secs();
        if secs > 0 {
            (self.bytes * 8) / secs
        } else {
            0
        }
    }
}

/// Live counters updated by the broadcaster
#[derive(Debug)]
pub struct BroadcastCounters {
    chunks: AtomicU64,
    bytes: AtomicU64,
    deliveries: AtomicU64,
    pruned: AtomicU64,
    started_at: Instant,
}

impl BroadcastCounters {
    pub fn new() -> Self {
        Self {
            chunks: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            pruned: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Record one fanned-out chunk
    pub fn record_tick(&self, bytes: usize, delivered: usize, pruned: usize) {
        self.chunks.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.deliveries.fetch_add(delivered as u64, Ordering::Relaxed);
        self.pruned.fetch_add(pruned as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BroadcastStats {
        BroadcastStats {
            chunks: self.chunks.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            pruned: self.pruned.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
        }
    }
}

impl Default for BroadcastCounters {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_new() {
        let stats = BroadcastCounters::new().snapshot();
        assert_eq!(stats.chunks, 0);
        assert_eq!(stats.bytes, 0);
        assert_eq!(stats.deliveries, 0);
        assert_eq!(stats.pruned, 0);
    }

    #[test]
    fn test_record_tick() {
        let counters = BroadcastCounters::new();
        counters.record_tick(4096, 3, 1);
        counters.record_tick(1000, 2, 0);

        let stats = counters.snapshot();
        assert_eq!(stats.chunks, 2);
        assert_eq!(stats.bytes, 5096);
        assert_eq!(stats.deliveries, 5);
        assert_eq!(stats.pruned, 1);
    }

    #[test]
    fn test_bitrate() {
        let stats = BroadcastStats {
            bytes: 160_000,
            uptime: Duration::from_secs(10),
            ..Default::default()
        };
        // 160,000 bytes * 8 bits / 10 seconds
        assert_eq!(stats.bitrate(), 128_000);

        let stats = BroadcastStats {
            bytes: 160_000,
            ..Default::default()
        };
        assert_eq!(stats.bitrate(), 0);
    }
}
