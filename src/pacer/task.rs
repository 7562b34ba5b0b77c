//! Pacer pull loop

use std::mem;
use std::ops::ControlFlow;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, oneshot, watch};

use super::clock::RateClock;
use super::{PacerStatus, Upstream};

/// Requests from the pacer's owner
pub(super) enum Control {
    /// Stop pulling and hand the plain upstream back
    Detach(oneshot::Sender<Option<Upstream>>),
    /// Resume pulling from a plain upstream
    Attach(Upstream),
    /// Pull from `merged` until it ends, then resume from whatever `resume` yields
    Splice {
        merged: Upstream,
        resume: oneshot::Receiver<Upstream>,
    },
    Stop,
}

/// Where the next bytes come from
enum Feed {
    Attached(Upstream),
    Spliced {
        merged: Upstream,
        resume: oneshot::Receiver<Upstream>,
    },
    /// Merged output ended, waiting for the live continuation
    Resuming(oneshot::Receiver<Upstream>),
    Detached,
}

pub(super) struct PacerTask {
    feed: Feed,
    /// Chunk read from upstream but not yet accepted downstream
    pending: Option<Bytes>,
    clock: RateClock,
    buf: Vec<u8>,
    output: mpsc::Sender<Bytes>,
    control: mpsc::Receiver<Control>,
    status: watch::Sender<PacerStatus>,
}

impl PacerTask {
    pub(super) fn new(
        upstream: Upstream,
        bytes_per_sec: u64,
        chunk_size: usize,
        output: mpsc::Sender<Bytes>,
        control: mpsc::Receiver<Control>,
        status: watch::Sender<PacerStatus>,
    ) -> Self {
        Self {
            feed: Feed::Attached(upstream),
            pending: None,
            clock: RateClock::new(bytes_per_sec),
            buf: vec![0; chunk_size.max(1)],
            output,
            control,
            status,
        }
    }

    pub(super) async fn run(mut self) {
        tracing::debug!(bytes_per_sec = self.clock.bytes_per_sec(), "Pacer started");

        while self.step().await.is_continue() {}

        // Dropping the feed releases the upstream; dropping the sender ends
        // the paced stream.
        self.feed = Feed::Detached;
        self.pending = None;
        let _ = self.status.send(PacerStatus::Finished);
        tracing::debug!("Pacer finished");
    }

    async fn step(&mut self) -> ControlFlow<()> {
        if let Some(chunk) = self.pending.take() {
            return self.deliver(chunk).await;
        }

        let due = self.clock.next_due();
        if due > tokio::time::Instant::now() {
            tokio::select! {
                biased;
                ctl = self.control.recv() => return self.on_control(ctl),
                _ = tokio::time::sleep_until(due) => {}
            }
        }

        self.pull().await
    }

    async fn deliver(&mut self, chunk: Bytes) -> ControlFlow<()> {
        // The permit must not borrow `self`, the control arm needs it mutably
        let output = self.output.clone();

        tokio::select! {
            biased;
            ctl = self.control.recv() => {
                self.pending = Some(chunk);
                self.on_control(ctl)
            }
            permit = output.reserve() => match permit {
                Ok(permit) => {
                    self.clock.consume(chunk.len());
                    permit.send(chunk);
                    ControlFlow::Continue(())
                }
                Err(_) => {
                    tracing::debug!("Paced stream dropped downstream");
                    ControlFlow::Break(())
                }
            }
        }
    }

    async fn pull(&mut self) -> ControlFlow<()> {
        match &mut self.feed {
            Feed::Detached => {
                let ctl = self.control.recv().await;
                self.on_control(ctl)
            }
            Feed::Resuming(resume) => {
                tokio::select! {
                    biased;
                    ctl = self.control.recv() => self.on_control(ctl),
                    live = resume => match live {
                        Ok(upstream) => {
                            tracing::info!("Splice ended, resuming live source");
                            self.switch(Feed::Attached(upstream), PacerStatus::Running);
                            ControlFlow::Continue(())
                        }
                        Err(_) => {
                            tracing::error!("Live source lost during splice");
                            ControlFlow::Break(())
                        }
                    }
                }
            }
            Feed::Attached(upstream) | Feed::Spliced { merged: upstream, .. } => {
                let read = tokio::select! {
                    biased;
                    ctl = self.control.recv() => return self.on_control(ctl),
                    read = upstream.read(&mut self.buf) => read,
                };
                self.on_read(read)
            }
        }
    }

    fn on_read(&mut self, read: std::io::Result<usize>) -> ControlFlow<()> {
        let spliced = matches!(self.feed, Feed::Spliced { .. });

        match read {
            Ok(0) if spliced => {
                self.end_splice();
                ControlFlow::Continue(())
            }
            Ok(0) => {
                tracing::info!("Source exhausted");
                ControlFlow::Break(())
            }
            Ok(n) => {
                self.pending = Some(Bytes::copy_from_slice(&self.buf[..n]));
                ControlFlow::Continue(())
            }
            Err(e) if spliced => {
                tracing::warn!(error = %e, "Merged stream failed, falling back to live source");
                self.end_splice();
                ControlFlow::Continue(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Source read failed");
                ControlFlow::Break(())
            }
        }
    }

    fn end_splice(&mut self) {
        if let Feed::Spliced { resume, .. } = mem::replace(&mut self.feed, Feed::Detached) {
            self.feed = Feed::Resuming(resume);
        }
    }

    fn switch(&mut self, feed: Feed, status: PacerStatus) {
        self.feed = feed;
        self.clock.rebase();
        let _ = self.status.send(status);
    }

    fn on_control(&mut self, ctl: Option<Control>) -> ControlFlow<()> {
        match ctl {
            None | Some(Control::Stop) => ControlFlow::Break(()),
            Some(Control::Detach(reply)) => {
                let upstream = match mem::replace(&mut self.feed, Feed::Detached) {
                    Feed::Attached(upstream) => Some(upstream),
                    other => {
                        self.feed = other;
                        None
                    }
                };
                let detached = upstream.is_some();
                if detached {
                    let _ = self.status.send(PacerStatus::Detached);
                }

                // Nobody took it, keep pulling from it
                if let Err(Some(upstream)) = reply.send(upstream) {
                    self.feed = Feed::Attached(upstream);
                    let _ = self.status.send(PacerStatus::Running);
                }
                ControlFlow::Continue(())
            }
            Some(Control::Attach(upstream)) => {
                self.switch(Feed::Attached(upstream), PacerStatus::Running);
                ControlFlow::Continue(())
            }
            Some(Control::Splice { merged, resume }) => {
                self.switch(Feed::Spliced { merged, resume }, PacerStatus::Spliced);
                ControlFlow::Continue(())
            }
        }
    }
}
