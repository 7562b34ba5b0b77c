//! Chunk fan-out
//!
//! Every paced chunk is offered to each registered listener in turn. A tick is
//! complete once every still-open listener has been offered the chunk; sinks
//! that are closed, or that fail to accept within the write timeout, are
//! removed from the registry and the tick carries on with the rest.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::pacer::PacedStream;
use crate::registry::{ListenerId, ListenerRegistry};
use crate::stats::{BroadcastCounters, BroadcastStats};

/// Outcome of a single broadcast tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Listeners that accepted the chunk
    pub delivered: usize,
    /// Listeners removed during this tick
    pub pruned: Vec<ListenerId>,
}

/// Writes paced chunks to every registered listener
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<ListenerRegistry>,
    write_timeout: Duration,
    counters: Arc<BroadcastCounters>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ListenerRegistry>, write_timeout: Duration) -> Self {
        Self {
            registry,
            write_timeout,
            counters: Arc::new(BroadcastCounters::new()),
        }
    }

    /// Registry this broadcaster delivers to
    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.registry
    }

    /// Counters accumulated so far
    pub fn stats(&self) -> BroadcastStats {
        self.counters.snapshot()
    }

    /// Offer `chunk` to every listener, pruning the ones that are gone
    pub async fn write(&self, chunk: Bytes) -> TickReport {
        let sinks = self.registry.snapshot().await;
        let mut report = TickReport::default();

        for sink in sinks {
            if sink.is_closed() {
                report.pruned.push(sink.id());
                continue;
            }

            match sink.write(chunk.clone(), self.write_timeout).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::debug!(listener = %sink.id(), error = %e, "Dropping listener");
                    report.pruned.push(sink.id());
                }
            }
        }

        let removed = self.registry.remove_all(&report.pruned).await;
        if removed > 0 {
            tracing::debug!(pruned = removed, delivered = report.delivered, "Pruned listeners");
        }

        self.counters
            .record_tick(chunk.len(), report.delivered, removed);

        report
    }

    /// Drain a paced stream into the listeners until it ends
    ///
    /// Returns the number of chunks broadcast.
    pub async fn pump(&self, mut paced: PacedStream) -> u64 {
        let mut chunks = 0;
        while let Some(chunk) = paced.next_chunk().await {
            self.write(chunk).await;
            chunks += 1;
        }

        tracing::debug!(chunks, "Paced stream ended");
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broadcaster(capacity: usize) -> Broadcaster {
        Broadcaster::new(
            Arc::new(ListenerRegistry::new(capacity)),
            Duration::from_millis(50),
        )
    }

    #[tokio::test]
    async fn test_delivers_to_open_and_prunes_closed() {
        let broadcaster = broadcaster(4);
        let registry = broadcaster.registry().clone();

        let (a, mut stream_a) = registry.register().await;
        let (b, stream_b) = registry.register().await;
        drop(stream_b);

        let report = broadcaster.write(Bytes::from_static(b"chunk")).await;

        assert_eq!(report.delivered, 1);
        assert_eq!(report.pruned, vec![b]);
        assert_eq!(stream_a.recv().await.unwrap(), Bytes::from_static(b"chunk"));
        assert!(registry.contains(a).await);
        assert!(!registry.contains(b).await);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_removed_listener_does_not_affect_others() {
        let broadcaster = broadcaster(4);
        let registry = broadcaster.registry().clone();

        let (_a, mut stream_a) = registry.register().await;
        let (b, _stream_b) = registry.register().await;
        let (_c, mut stream_c) = registry.register().await;
        registry.unregister(b).await;

        let report = broadcaster.write(Bytes::from_static(b"x")).await;

        assert_eq!(report.delivered, 2);
        assert!(report.pruned.is_empty());
        assert_eq!(stream_a.recv().await.unwrap(), Bytes::from_static(b"x"));
        assert_eq!(stream_c.recv().await.unwrap(), Bytes::from_static(b"x"));
    }

    #[tokio::test]
    async fn test_stalled_listener_is_pruned() {
        let broadcaster = broadcaster(1);
        let registry = broadcaster.registry().clone();

        let (stalled, _stalled_stream) = registry.register().await;
        let (_ok, mut stream_ok) = registry.register().await;

        // First tick fills the stalled listener's buffer
        let report = broadcaster.write(Bytes::from_static(b"1")).await;
        assert_eq!(report.delivered, 2);
        assert_eq!(stream_ok.recv().await.unwrap(), Bytes::from_static(b"1"));

        // Second tick cannot fit and times out
        let report = broadcaster.write(Bytes::from_static(b"2")).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.pruned, vec![stalled]);
        assert_eq!(stream_ok.recv().await.unwrap(), Bytes::from_static(b"2"));
    }

    #[tokio::test]
    async fn test_chunks_arrive_in_order() {
        let broadcaster = broadcaster(16);
        let registry = broadcaster.registry().clone();
        let (_a, mut stream_a) = registry.register().await;
        let (_b, mut stream_b) = registry.register().await;

        for i in 0..10u8 {
            broadcaster.write(Bytes::from(vec![i])).await;
        }

        for i in 0..10u8 {
            assert_eq!(stream_a.recv().await.unwrap()[0], i);
            assert_eq!(stream_b.recv().await.unwrap()[0], i);
        }

        let stats = broadcaster.stats();
        assert_eq!(stats.chunks, 10);
        assert_eq!(stats.bytes, 10);
        assert_eq!(stats.deliveries, 20);
    }

    #[tokio::test]
    async fn test_write_with_no_listeners() {
        let broadcaster = broadcaster(4);
        let report = broadcaster.write(Bytes::from_static(b"into the void")).await;

        assert_eq!(report, TickReport::default());
        assert_eq!(broadcaster.stats().chunks, 1);
    }
}
