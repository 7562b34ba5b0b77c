//! Listener handles
//!
//! Each listener is a bounded channel: the registry keeps the sending half
//! ([`ListenerSink`]) and the transport layer drains the receiving half
//! ([`ListenerStream`]).

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;

use super::error::ListenerWriteError;

/// Opaque listener identifier, unique for the lifetime of a registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(super) u64);

impl ListenerId {
    /// Raw numeric value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Writable end of a listener, held by the registry
#[derive(Debug, Clone)]
pub struct ListenerSink {
    id: ListenerId,
    tx: mpsc::Sender<Bytes>,
}

impl ListenerSink {
    pub(super) fn new(id: ListenerId, tx: mpsc::Sender<Bytes>) -> Self {
        Self { id, tx }
    }

    /// Listener this sink delivers to
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Whether the listener has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Offer a chunk, waiting at most `timeout` for buffer space
    pub async fn write(&self, chunk: Bytes, timeout: Duration) -> Result<(), ListenerWriteError> {
        match self.tx.send_timeout(chunk, timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Closed(_)) => Err(ListenerWriteError::Closed(self.id)),
            Err(SendTimeoutError::Timeout(_)) => Err(ListenerWriteError::TimedOut(self.id)),
        }
    }
}

/// Readable end of a listener, handed to the transport layer
///
/// Dropping it marks the listener closed; the next broadcast tick prunes it.
#[derive(Debug)]
pub struct ListenerStream {
    id: ListenerId,
    rx: mpsc::Receiver<Bytes>,
}

impl ListenerStream {
    pub(super) fn new(id: ListenerId, rx: mpsc::Receiver<Bytes>) -> Self {
        Self { id, rx }
    }

    /// Listener this stream belongs to
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Next broadcast chunk, or `None` once the listener has been removed
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Chunk already buffered for this listener, if any
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }

    /// Stop accepting chunks without dropping the stream
    pub fn close(&mut self) {
        self.rx.close();
    }
}
