//! Session state machine

use std::path::PathBuf;
use std::time::Instant;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::effect::Splice;
use crate::pacer::{PacerHandle, PacerStatus};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing is playing
    Idle,
    /// The source is being paced out to listeners
    Streaming,
    /// An effect clip is being mixed into the source
    Merging,
}

/// The file being broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    /// Path of the source file
    pub path: PathBuf,
    /// Measured (or fallback) bitrate in bits/sec
    pub bitrate: u64,
}

/// Resources held while a source is on air
pub(crate) struct OnAir {
    pub source: Source,
    pub pacer: PacerHandle,
    pub pump: JoinHandle<u64>,
    pub splice: Option<Splice>,
    pub started_at: Instant,
}

impl OnAir {
    /// Stop pacing and release the source and any mixer
    pub async fn release(self) {
        self.pacer.stop().await;
        if let Some(splice) = self.splice {
            splice.abort().await;
        }
        match self.pump.await {
            Ok(chunks) => tracing::debug!(chunks, "Broadcast pump stopped"),
            Err(e) => tracing::warn!(error = %e, "Broadcast pump failed"),
        }
    }
}

/// What the session needs done after observing the pacer
pub(crate) enum Settled {
    /// Nothing changed
    Unchanged,
    /// A merge ended; clean up its mixer
    MergeEnded(Splice),
    /// The source ran out; release everything
    SourceEnded(OnAir),
}

/// Complete session state
pub struct Session {
    state: SessionState,
    on_air: Option<OnAir>,
    /// Publishes every state change
    notify: watch::Sender<SessionState>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            on_air: None,
            notify: watch::Sender::new(SessionState::Idle),
        }
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.notify.subscribe()
    }

    fn set_state(&mut self, state: SessionState) {
        self.state = state;
        self.notify.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Source currently on air
    pub fn source(&self) -> Option<&Source> {
        self.on_air.as_ref().map(|on_air| &on_air.source)
    }

    /// How long the current source has been on air
    pub fn duration(&self) -> Option<std::time::Duration> {
        self.on_air.as_ref().map(|on_air| on_air.started_at.elapsed())
    }

    pub(crate) fn on_air(&self) -> Option<&OnAir> {
        self.on_air.as_ref()
    }

    /// Idle → Streaming
    pub(crate) fn begin(&mut self, on_air: OnAir) {
        debug_assert_eq!(self.state, SessionState::Idle);
        self.on_air = Some(on_air);
        self.set_state(SessionState::Streaming);
    }

    /// Streaming → Merging
    pub(crate) fn begin_merge(&mut self, splice: Splice) {
        if let Some(on_air) = self.on_air.as_mut() {
            on_air.splice = Some(splice);
            self.set_state(SessionState::Merging);
        }
    }

    /// Any → Idle, handing back whatever was on air
    pub(crate) fn end(&mut self) -> Option<OnAir> {
        self.set_state(SessionState::Idle);
        self.on_air.take()
    }

    /// Apply transitions the pacer has made on its own
    pub(crate) fn settle(&mut self) -> Settled {
        let status = match &self.on_air {
            Some(on_air) => on_air.pacer.status(),
            None => return Settled::Unchanged,
        };

        match (self.state, status) {
            (_, PacerStatus::Finished) => match self.end() {
                Some(on_air) => Settled::SourceEnded(on_air),
                None => Settled::Unchanged,
            },
            (SessionState::Merging, PacerStatus::Running) => {
                self.set_state(SessionState::Streaming);
                match self.on_air.as_mut().and_then(|on_air| on_air.splice.take()) {
                    Some(splice) => Settled::MergeEnded(splice),
                    None => Settled::Unchanged,
                }
            }
            _ => Settled::Unchanged,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
