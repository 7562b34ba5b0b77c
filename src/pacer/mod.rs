//! Real-time pacing of a byte source
//!
//! A pacer pulls chunks from an upstream reader and releases them no faster
//! than the target byte rate. Its output channel holds a single chunk, so a
//! downstream that is not ready stops the pacer from pulling any further.
//!
//! The upstream can be swapped while the pacer runs:
//!
//! ```text
//!   Attached(source) ──detach──► Detached ──splice──► Spliced(merged)
//!         ▲                         │                      │ merged EOF
//!         └───────── attach ────────┘                      ▼
//!         └──────────────────── live continuation ◄── Resuming
//! ```
//!
//! A chunk that was read but not yet accepted downstream is kept across every
//! switch, so no bytes are lost or repeated.

mod clock;
mod task;

use bytes::Bytes;
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::EngineConfig;

pub use clock::RateClock;

use task::{Control, PacerTask};

/// A boxed byte source the pacer can pull from
pub type Upstream = Box<dyn AsyncRead + Send + Unpin>;

/// What the pacer is currently pulling from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacerStatus {
    /// Pulling from a plain upstream
    Running,
    /// Upstream handed out, waiting for a new one
    Detached,
    /// Pulling from a merged stream
    Spliced,
    /// Stream ended; no further chunks will be emitted
    Finished,
}

/// Start pacing `upstream` at `bits_per_sec`
///
/// The byte rate is `bits_per_sec / config.bitrate_divisor`.
pub fn pace(upstream: Upstream, bits_per_sec: u64, config: &EngineConfig) -> (PacerHandle, PacedStream) {
    Pacer::spawn(upstream, config.byte_rate(bits_per_sec), config.chunk_size)
}

/// Spawns pacer tasks
pub struct Pacer;

impl Pacer {
    /// Start pacing `upstream` at `bytes_per_sec`, pulling at most `chunk_size` bytes per chunk
    pub fn spawn(upstream: Upstream, bytes_per_sec: u64, chunk_size: usize) -> (PacerHandle, PacedStream) {
        let (output_tx, output_rx) = mpsc::channel(1);
        let (control_tx, control_rx) = mpsc::channel(8);
        let (status_tx, status_rx) = watch::channel(PacerStatus::Running);

        let task = PacerTask::new(
            upstream,
            bytes_per_sec,
            chunk_size,
            output_tx,
            control_rx,
            status_tx,
        );

        let handle = PacerHandle {
            control: control_tx,
            status: status_rx,
            task: tokio::spawn(task.run()),
        };

        (handle, PacedStream { rx: output_rx })
    }
}

/// Control side of a running pacer
///
/// Dropping the handle stops the pacer.
pub struct PacerHandle {
    control: mpsc::Sender<Control>,
    status: watch::Receiver<PacerStatus>,
    task: JoinHandle<()>,
}

impl PacerHandle {
    /// Current status
    pub fn status(&self) -> PacerStatus {
        *self.status.borrow()
    }

    /// Watch status changes
    pub fn subscribe(&self) -> watch::Receiver<PacerStatus> {
        self.status.clone()
    }

    /// Stop pulling and take the plain upstream
    ///
    /// Returns `None` if the pacer is not attached to a plain upstream.
    pub async fn detach(&self) -> Option<Upstream> {
        let (tx, rx) = oneshot::channel();
        self.control.send(Control::Detach(tx)).await.ok()?;
        rx.await.ok().flatten()
    }

    /// Resume pulling from `upstream`
    pub async fn attach(&self, upstream: Upstream) -> bool {
        self.control.send(Control::Attach(upstream)).await.is_ok()
    }

    /// Pull from `merged` until it ends, then from the upstream sent on `resume`
    pub async fn splice(&self, merged: Upstream, resume: oneshot::Receiver<Upstream>) -> bool {
        self.control
            .send(Control::Splice { merged, resume })
            .await
            .is_ok()
    }

    /// Stop the pacer and wait for it to release its upstream
    pub async fn stop(mut self) {
        let _ = self.control.send(Control::Stop).await;
        if let Err(e) = (&mut self.task).await {
            tracing::warn!(error = %e, "Pacer task did not shut down cleanly");
        }
    }
}

/// Paced output of a pacer
#[derive(Debug)]
pub struct PacedStream {
    rx: mpsc::Receiver<Bytes>,
}

impl PacedStream {
    /// Next paced chunk, or `None` once the pacer has finished
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }
}
