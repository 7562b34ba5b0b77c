//! Live source feeder
//!
//! Copies the detached live source into the mixer's input. The feeder owns
//! the source while a mix runs and hands it back when it is done, so the
//! pacer can carry on from exactly where the mixer stopped reading.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::pacer::Upstream;

/// What a finished feeder hands back
pub struct FeedOutcome {
    /// The live source, positioned after the last byte taken from it
    pub source: Upstream,
    /// Bytes taken from the source while recording was on
    pub consumed: Bytes,
}

impl FeedOutcome {
    /// The source with any recorded bytes put back in front of it
    pub fn rewound(self) -> Upstream {
        if self.consumed.is_empty() {
            self.source
        } else {
            Box::new(std::io::Cursor::new(self.consumed).chain(self.source))
        }
    }
}

/// Handle to a running feeder
pub struct Feeder {
    task: JoinHandle<FeedOutcome>,
    recording: Arc<AtomicBool>,
    abort: oneshot::Sender<()>,
}

impl Feeder {
    /// Start copying up to `limit` bytes (or everything) of `source` into `sink`
    ///
    /// Bytes are recorded until [`Feeder::stop_recording`] so they can be
    /// replayed if the mix is abandoned.
    pub fn spawn<W>(source: Upstream, sink: W, limit: Option<u64>, chunk_size: usize) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let recording = Arc::new(AtomicBool::new(true));
        let (abort_tx, abort_rx) = oneshot::channel();

        let task = tokio::spawn(feed(
            source,
            sink,
            limit,
            chunk_size.max(1),
            recording.clone(),
            abort_rx,
        ));

        Self {
            task,
            recording,
            abort: abort_tx,
        }
    }

    /// Stop keeping a copy of fed bytes
    pub fn stop_recording(&self) {
        self.recording.store(false, Ordering::Relaxed);
    }

    /// Split into the task and its abort trigger
    ///
    /// Sending on, or dropping, the trigger makes the feeder stop early.
    pub fn into_parts(self) -> (JoinHandle<FeedOutcome>, oneshot::Sender<()>) {
        (self.task, self.abort)
    }

    /// Stop feeding and take the source back
    pub async fn cancel(self) -> Option<FeedOutcome> {
        let _ = self.abort.send(());
        match self.task.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::error!(error = %e, "Feeder task failed");
                None
            }
        }
    }
}

async fn feed<W>(
    mut source: Upstream,
    mut sink: W,
    limit: Option<u64>,
    chunk_size: usize,
    recording: Arc<AtomicBool>,
    mut abort: oneshot::Receiver<()>,
) -> FeedOutcome
where
    W: AsyncWrite + Send + Unpin,
{
    let mut buf = vec![0u8; chunk_size];
    let mut consumed = BytesMut::new();
    let mut remaining = limit;
    let mut fed = 0u64;

    loop {
        let want = match remaining {
            Some(0) => break,
            Some(left) => buf.len().min(left as usize),
            None => buf.len(),
        };

        let n = tokio::select! {
            biased;
            _ = &mut abort => break,
            read = source.read(&mut buf[..want]) => match read {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(error = %e, "Live source read failed while mixing");
                    break;
                }
            },
        };

        if recording.load(Ordering::Relaxed) {
            consumed.extend_from_slice(&buf[..n]);
        }
        if let Some(left) = remaining.as_mut() {
            *left -= n as u64;
        }
        fed += n as u64;

        tokio::select! {
            biased;
            _ = &mut abort => break,
            written = sink.write_all(&buf[..n]) => {
                if let Err(e) = written {
                    tracing::debug!(error = %e, "Mixer stopped accepting input");
                    break;
                }
            }
        }
    }

    // Closing the input lets the mixer finish
    let _ = sink.shutdown().await;
    drop(sink);

    tracing::debug!(fed, "Feeder finished");

    FeedOutcome {
        source,
        consumed: consumed.freeze(),
    }
}
