//! Listener write errors

use super::listener::ListenerId;

/// Why a chunk could not be handed to a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerWriteError {
    /// The listener's stream was dropped
    Closed(ListenerId),
    /// The listener did not accept the chunk within the write timeout
    TimedOut(ListenerId),
}

impl ListenerWriteError {
    /// Listener the failure belongs to
    pub fn listener(&self) -> ListenerId {
        match self {
            ListenerWriteError::Closed(id) | ListenerWriteError::TimedOut(id) => *id,
        }
    }
}

impl std::fmt::Display for ListenerWriteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerWriteError::Closed(id) => write!(f, "Listener closed: {}", id),
            ListenerWriteError::TimedOut(id) => write!(f, "Listener write timed out: {}", id),
        }
    }
}

impl std::error::Error for ListenerWriteError {}
