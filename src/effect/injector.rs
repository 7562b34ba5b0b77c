//! Effect injector

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::pacer::{PacerHandle, Upstream};
use crate::probe::BitrateProbe;

use super::feeder::Feeder;
use super::mixer::{MixError, MixProcess};
use super::EffectRequest;

/// How long a mixer whose output ended may take to exit
const REAP_GRACE: Duration = Duration::from_secs(2);

/// Resources of a merge in progress
pub struct Splice {
    clip: PathBuf,
    mixer: MixProcess,
    /// Dropping or firing this stops the feeder
    abort: oneshot::Sender<()>,
    /// Hands the live source back to the pacer once the feeder is done
    relay: JoinHandle<()>,
}

impl Splice {
    /// Clip being mixed in
    pub fn clip(&self) -> &Path {
        &self.clip
    }

    /// Clean up after the merged output ended on its own
    pub async fn finish(self) {
        drop(self.abort);
        self.mixer.reap(REAP_GRACE).await;
        let _ = self.relay.await;
        tracing::debug!(clip = %self.clip.display(), "Splice cleaned up");
    }

    /// Tear the merge down early
    ///
    /// The mixer is killed first so a feeder blocked on its input wakes up.
    pub async fn abort(self) {
        self.mixer.terminate().await;
        let _ = self.abort.send(());
        if tokio::time::timeout(REAP_GRACE, self.relay).await.is_err() {
            tracing::warn!(clip = %self.clip.display(), "Feeder did not stop in time");
        }
    }
}

/// Splices effect clips into a paced live source
#[derive(Debug, Clone)]
pub struct EffectInjector {
    config: EngineConfig,
    probe: BitrateProbe,
}

impl EffectInjector {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            probe: BitrateProbe::new(config.clone()),
            config,
        }
    }

    /// Mix `request.clip` into whatever `pacer` is pulling from
    ///
    /// On success the pacer is pulling merged output and will go back to the
    /// live source by itself once the merge ends. On error the pacer is left
    /// on the live source with nothing skipped.
    pub async fn inject(
        &self,
        pacer: &PacerHandle,
        bytes_per_sec: u64,
        request: &EffectRequest,
    ) -> Result<Splice, MixError> {
        let limit = self.live_budget(&request.clip, bytes_per_sec).await;

        let mut mixer = MixProcess::spawn(&self.config.tool_path, request, &self.config.media_type)?;
        let (stdin, mut stdout) = match (mixer.take_stdin(), mixer.take_stdout()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                mixer.terminate().await;
                return Err(MixError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "mixer pipes unavailable",
                )));
            }
        };

        let Some(live) = pacer.detach().await else {
            mixer.terminate().await;
            return Err(MixError::NotAttached);
        };

        let feeder = Feeder::spawn(live, stdin, limit, self.config.chunk_size);

        let first = match mixer
            .first_output(&mut stdout, self.config.chunk_size, self.config.mix_start_timeout)
            .await
        {
            Ok(first) => first,
            Err(e) => {
                mixer.terminate().await;
                match feeder.cancel().await {
                    Some(outcome) => {
                        pacer.attach(outcome.rewound()).await;
                    }
                    None => tracing::error!("Live source lost while abandoning effect"),
                }
                return Err(e);
            }
        };

        feeder.stop_recording();
        let (feed_task, abort) = feeder.into_parts();
        let (resume_tx, resume_rx) = oneshot::channel();

        let relay = tokio::spawn(async move {
            match feed_task.await {
                Ok(outcome) => {
                    if resume_tx.send(outcome.source).is_err() {
                        tracing::debug!("Pacer stopped before the splice ended");
                    }
                }
                Err(e) => tracing::error!(error = %e, "Feeder task failed"),
            }
        });

        let merged: Upstream = Box::new(Cursor::new(first).chain(stdout));
        if !pacer.splice(merged, resume_rx).await {
            tracing::warn!("Pacer stopped while starting splice");
        }

        tracing::info!(
            clip = %request.clip.display(),
            live_bytes = ?limit,
            "Effect splice started"
        );

        Ok(Splice {
            clip: request.clip.clone(),
            mixer,
            abort,
            relay,
        })
    }

    /// Live bytes that cover the clip's playing time, if it is known
    async fn live_budget(&self, clip: &Path, bytes_per_sec: u64) -> Option<u64> {
        let duration = self.probe.duration(clip).await?;
        Some((duration.as_secs_f64() * bytes_per_sec as f64).ceil() as u64)
    }
}
