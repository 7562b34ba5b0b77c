//! External mixer process
//!
//! Runs `<tool> -t <type> -v <source vol> -m - -t <type> -v <clip vol> <clip> -t <type> -`:
//! the live feed arrives on stdin, the merged feed leaves on stdout. Stderr is
//! drained in the background and logged.

use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use super::EffectRequest;

/// Why a mix could not be started
#[derive(Debug)]
pub enum MixError {
    /// The mixer could not be started
    Spawn(io::Error),
    /// The mixer ended without producing any output
    NoOutput(Option<i32>),
    /// The mixer produced nothing within the start timeout
    Timeout(Duration),
    /// The pacer was not attached to a plain source
    NotAttached,
    /// I/O error talking to the mixer
    Io(io::Error),
}

impl std::fmt::Display for MixError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MixError::Spawn(e) => write!(f, "Failed to start mixer: {}", e),
            MixError::NoOutput(Some(code)) => {
                write!(f, "Mixer exited with status {} before producing output", code)
            }
            MixError::NoOutput(None) => write!(f, "Mixer ended before producing output"),
            MixError::Timeout(t) => write!(f, "Mixer produced no output within {:?}", t),
            MixError::NotAttached => write!(f, "Pacer is not attached to the live source"),
            MixError::Io(e) => write!(f, "Mixer I/O error: {}", e),
        }
    }
}

impl std::error::Error for MixError {}

/// Arguments for merging piped live input with `request.clip`
pub fn mix_args(request: &EffectRequest, media_type: &str) -> Vec<OsString> {
    let media = OsString::from(media_type);
    vec![
        "-t".into(),
        media.clone(),
        "-v".into(),
        request.source_volume.to_string().into(),
        "-m".into(),
        "-".into(),
        "-t".into(),
        media.clone(),
        "-v".into(),
        request.clip_volume.to_string().into(),
        request.clip.clone().into_os_string(),
        "-t".into(),
        media,
        "-".into(),
    ]
}

/// A running mixer
pub struct MixProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
}

impl MixProcess {
    /// Start the mixer for `request`
    pub fn spawn(tool: &Path, request: &EffectRequest, media_type: &str) -> Result<Self, MixError> {
        let mut child = Command::new(tool)
            .args(mix_args(request, media_type))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(MixError::Spawn)?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(line = %line, "Mixer diagnostic");
                }
            });
        }

        tracing::debug!(clip = %request.clip.display(), pid = ?child.id(), "Mixer started");

        Ok(Self {
            stdin: child.stdin.take(),
            stdout: child.stdout.take(),
            child,
        })
    }

    /// Take the mixer's input pipe
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    /// Take the mixer's output pipe
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /// Wait for the first merged bytes
    pub async fn first_output(
        &mut self,
        stdout: &mut ChildStdout,
        chunk_size: usize,
        timeout: Duration,
    ) -> Result<Bytes, MixError> {
        let mut buf = vec![0; chunk_size.max(1)];
        let n = tokio::time::timeout(timeout, stdout.read(&mut buf))
            .await
            .map_err(|_| MixError::Timeout(timeout))?
            .map_err(MixError::Io)?;

        if n == 0 {
            let code = match self.child.try_wait() {
                Ok(Some(status)) => status.code(),
                _ => None,
            };
            return Err(MixError::NoOutput(code));
        }

        buf.truncate(n);
        Ok(Bytes::from(buf))
    }

    /// Kill the mixer and wait for it to exit
    pub async fn terminate(mut self) {
        self.stdin.take();
        if let Err(e) = self.child.kill().await {
            tracing::debug!(error = %e, "Mixer already gone");
        }
    }

    /// Wait for a mixer whose output has ended, killing it after `grace`
    pub async fn reap(mut self, grace: Duration) {
        self.stdin.take();
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) if status.success() => tracing::debug!("Mixer exited"),
            Ok(Ok(status)) => tracing::warn!(status = ?status.code(), "Mixer exited with failure"),
            Ok(Err(e)) => tracing::warn!(error = %e, "Failed to wait for mixer"),
            Err(_) => {
                tracing::warn!("Mixer did not exit after its output ended, killing");
                let _ = self.child.kill().await;
            }
        }
    }
}
