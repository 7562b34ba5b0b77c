//! Listener registry implementation

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, RwLock};

use super::listener::{ListenerId, ListenerSink, ListenerStream};

/// Set of connected listeners
///
/// Thread-safe via `RwLock`. Broadcast ticks only take the read lock long
/// enough to snapshot the sinks, so register/unregister never wait on a slow
/// listener.
pub struct ListenerRegistry {
    /// Map of listener id to its sink
    listeners: RwLock<HashMap<ListenerId, ListenerSink>>,

    /// Next id to hand out
    next_id: AtomicU64,

    /// Chunks buffered per listener
    capacity: usize,
}

impl ListenerRegistry {
    /// Create a registry whose listeners buffer up to `capacity` chunks
    pub fn new(capacity: usize) -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    /// Add a listener and return its id and readable stream
    pub async fn register(&self) -> (ListenerId, ListenerStream) {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.capacity);

        let mut listeners = self.listeners.write().await;
        listeners.insert(id, ListenerSink::new(id, tx));

        tracing::debug!(listener = %id, listeners = listeners.len(), "Listener registered");

        (id, ListenerStream::new(id, rx))
    }

    /// Remove a listener; absent ids are ignored
    ///
    /// Returns whether the listener was present.
    pub async fn unregister(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().await;
        let removed = listeners.remove(&id).is_some();

        if removed {
            tracing::debug!(listener = %id, listeners = listeners.len(), "Listener unregistered");
        }

        removed
    }

    /// Remove several listeners at once, returning how many were present
    pub async fn remove_all(&self, ids: &[ListenerId]) -> usize {
        if ids.is_empty() {
            return 0;
        }

        let mut listeners = self.listeners.write().await;
        ids.iter()
            .filter(|id| listeners.remove(id).is_some())
            .count()
    }

    /// Visit every current listener, in no particular order
    pub async fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(ListenerId, &ListenerSink),
    {
        let listeners = self.listeners.read().await;
        for (id, sink) in listeners.iter() {
            f(*id, sink);
        }
    }

    /// Clone out the current sinks so they can be written without holding the lock
    pub async fn snapshot(&self) -> Vec<ListenerSink> {
        self.listeners.read().await.values().cloned().collect()
    }

    /// Whether a listener is currently registered
    pub async fn contains(&self, id: ListenerId) -> bool {
        self.listeners.read().await.contains_key(&id)
    }

    /// Number of registered listeners
    pub async fn len(&self) -> usize {
        self.listeners.read().await.len()
    }

    /// Whether no listener is registered
    pub async fn is_empty(&self) -> bool {
        self.listeners.read().await.is_empty()
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new(crate::config::EngineConfig::default().listener_capacity)
    }
}
