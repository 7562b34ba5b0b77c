//! Bitrate probe
//!
//! Asks the external audio tool for a file's encoded bitrate
//! (`<tool> --i -B <path>`). The tool answers with a short string such as
//! `128k` or `1.41M`; anything else, a non-zero exit, diagnostic output or a
//! timeout counts as a failure and the configured fallback bitrate is used.

use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::config::EngineConfig;

/// Why a probe did not yield a value
#[derive(Debug)]
pub enum ProbeError {
    /// The tool could not be started
    Spawn(io::Error),
    /// The tool did not finish within the probe timeout
    Timeout(Duration),
    /// The tool exited unsuccessfully
    Exit(Option<i32>),
    /// The tool wrote to its diagnostic channel
    Diagnostic(String),
    /// The tool's answer could not be parsed
    Unparsable(String),
}

impl std::fmt::Display for ProbeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeError::Spawn(e) => write!(f, "Failed to start probe tool: {}", e),
            ProbeError::Timeout(t) => write!(f, "Probe timed out after {:?}", t),
            ProbeError::Exit(Some(code)) => write!(f, "Probe tool exited with status {}", code),
            ProbeError::Exit(None) => write!(f, "Probe tool terminated by signal"),
            ProbeError::Diagnostic(msg) => write!(f, "Probe tool reported: {}", msg),
            ProbeError::Unparsable(out) => write!(f, "Unparsable probe output: {:?}", out),
        }
    }
}

impl std::error::Error for ProbeError {}

/// Parse a bitrate answer, expanding `k`/`M` shorthand into bits/sec
///
/// `"128k"` becomes `128_000`. Zero is rejected since nothing can be paced at
/// zero bytes per second.
pub fn parse_bitrate(output: &str) -> Option<u64> {
    let (number, multiplier) = split_unit(output.trim())?;
    let bits = if number.contains('.') {
        let value: f64 = number.parse().ok()?;
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        (value * multiplier as f64).round() as u64
    } else {
        number.parse::<u64>().ok()?.checked_mul(multiplier)?
    };

    (bits > 0).then_some(bits)
}

/// Parse a duration answer in (fractional) seconds
pub fn parse_duration(output: &str) -> Option<Duration> {
    let secs: f64 = output.trim().parse().ok()?;
    if secs > 0.0 {
        Duration::try_from_secs_f64(secs).ok()
    } else {
        None
    }
}

fn split_unit(text: &str) -> Option<(&str, u64)> {
    let last = text.chars().last()?;
    let multiplier = match last {
        'k' | 'K' => 1_000,
        'M' => 1_000_000,
        _ if last.is_ascii_digit() => return Some((text, 1)),
        _ => return None,
    };
    let number = &text[..text.len() - last.len_utf8()];
    if number.is_empty() {
        None
    } else {
        Some((number, multiplier))
    }
}

/// Queries the external tool for file metadata
#[derive(Debug, Clone)]
pub struct BitrateProbe {
    config: EngineConfig,
}

impl BitrateProbe {
    /// Create a probe using the given configuration
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Bitrate of `path` in bits/sec, or the fallback bitrate on any failure
    pub async fn probe(&self, path: &Path) -> u64 {
        match self.try_probe(path).await {
            Ok(bitrate) => {
                tracing::debug!(path = %path.display(), bitrate, "Probed bitrate");
                bitrate
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    fallback = self.config.fallback_bitrate,
                    "Bitrate probe failed, using fallback"
                );
                self.config.fallback_bitrate
            }
        }
    }

    /// Bitrate of `path` in bits/sec
    pub async fn try_probe(&self, path: &Path) -> Result<u64, ProbeError> {
        let output = self.query(path, "-B").await?;
        parse_bitrate(&output).ok_or(ProbeError::Unparsable(output))
    }

    /// Playing time of `path`, if the tool can tell
    pub async fn duration(&self, path: &Path) -> Option<Duration> {
        match self.query(path, "-D").await {
            Ok(output) => parse_duration(&output),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Duration probe failed");
                None
            }
        }
    }

    /// Run `<tool> --i <flag> <path>` and return its trimmed stdout
    async fn query(&self, path: &Path, flag: &str) -> Result<String, ProbeError> {
        let child = Command::new(&self.config.tool_path)
            .arg("--i")
            .arg(flag)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ProbeError::Spawn)?;

        // Both pipes are drained concurrently; dropping the future on timeout
        // kills the child.
        let output = tokio::time::timeout(self.config.probe_timeout, child.wait_with_output())
            .await
            .map_err(|_| ProbeError::Timeout(self.config.probe_timeout))?
            .map_err(ProbeError::Spawn)?;

        let diagnostic = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !diagnostic.is_empty() {
            return Err(ProbeError::Diagnostic(diagnostic));
        }
        if !output.status.success() {
            return Err(ProbeError::Exit(output.status.code()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}
