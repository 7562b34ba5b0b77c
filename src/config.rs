//! Engine configuration

use std::path::PathBuf;
use std::time::Duration;

/// Bitrate used when the probe tool cannot tell us one (bits/sec)
pub const DEFAULT_FALLBACK_BITRATE: u64 = 64_000;

/// Bits per byte, the divisor from bitrate to pacer byte rate
pub const DEFAULT_BITRATE_DIVISOR: u64 = 8;

/// Bytes pulled from the upstream per paced chunk
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Engine configuration options
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// External audio tool used for probing and mixing
    pub tool_path: PathBuf,

    /// Bitrate substituted when probing fails (bits/sec)
    pub fallback_bitrate: u64,

    /// Divisor applied to the bitrate to get the pacer byte rate
    pub bitrate_divisor: u64,

    /// Upper bound on a single probe invocation
    pub probe_timeout: Duration,

    /// Bytes per paced chunk
    pub chunk_size: usize,

    /// Chunks buffered per listener before writes start to wait
    pub listener_capacity: usize,

    /// How long a single listener may hold up a broadcast tick
    pub listener_write_timeout: Duration,

    /// Volume multiplier for the live source while mixing
    pub source_volume: f32,

    /// Volume multiplier for the effect clip while mixing
    pub clip_volume: f32,

    /// Media type tag handed to the mixer for every input and output
    pub media_type: String,

    /// How long the mixer may take to produce its first bytes
    pub mix_start_timeout: Duration,

    /// Source played by the `start` command
    pub default_source: PathBuf,

    /// Directory holding effect clips
    pub clip_directory: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tool_path: PathBuf::from("sox"),
            fallback_bitrate: DEFAULT_FALLBACK_BITRATE,
            bitrate_divisor: DEFAULT_BITRATE_DIVISOR,
            probe_timeout: Duration::from_secs(5),
            chunk_size: DEFAULT_CHUNK_SIZE,
            listener_capacity: 32,
            listener_write_timeout: Duration::from_secs(2),
            source_volume: 0.99,
            clip_volume: 0.1,
            media_type: "mp3".to_string(),
            mix_start_timeout: Duration::from_secs(3),
            default_source: PathBuf::from("audio/songs/conversation.mp3"),
            clip_directory: PathBuf::from("audio/fx"),
        }
    }
}

impl EngineConfig {
    /// Set the external audio tool
    pub fn tool_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.tool_path = path.into();
        self
    }

    /// Set the fallback bitrate
    pub fn fallback_bitrate(mut self, bitrate: u64) -> Self {
        self.fallback_bitrate = bitrate.max(1);
        self
    }

    /// Set the bitrate divisor
    pub fn bitrate_divisor(mut self, divisor: u64) -> Self {
        self.bitrate_divisor = divisor.max(1);
        self
    }

    /// Set the probe timeout
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Set the paced chunk size
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Set the per-listener buffer capacity (in chunks)
    pub fn listener_capacity(mut self, capacity: usize) -> Self {
        self.listener_capacity = capacity.max(1);
        self
    }

    /// Set the per-listener write timeout
    pub fn listener_write_timeout(mut self, timeout: Duration) -> Self {
        self.listener_write_timeout = timeout;
        self
    }

    /// Set the mixing volumes for the live source and the clip
    pub fn volumes(mut self, source: f32, clip: f32) -> Self {
        self.source_volume = source;
        self.clip_volume = clip;
        self
    }

    /// Set the mixer start timeout
    pub fn mix_start_timeout(mut self, timeout: Duration) -> Self {
        self.mix_start_timeout = timeout;
        self
    }

    /// Set the default source
    pub fn default_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.default_source = path.into();
        self
    }

    /// Set the effect clip directory
    pub fn clip_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.clip_directory = dir.into();
        self
    }

    /// Pacer byte rate for a given bitrate
    pub fn byte_rate(&self, bitrate: u64) -> u64 {
        (bitrate / self.bitrate_divisor.max(1)).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();

        assert_eq!(config.tool_path, PathBuf::from("sox"));
        assert_eq!(config.fallback_bitrate, DEFAULT_FALLBACK_BITRATE);
        assert_eq!(config.bitrate_divisor, 8);
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.media_type, "mp3");
        assert!(config.source_volume > config.clip_volume);
    }

    #[test]
    fn test_byte_rate() {
        let config = EngineConfig::default();
        assert_eq!(config.byte_rate(128_000), 16_000);

        // Never hand the pacer a zero rate
        assert_eq!(config.byte_rate(0), 1);

        // A zero divisor set on the field directly is treated as one
        let mut config = EngineConfig::default();
        config.bitrate_divisor = 0;
        assert_eq!(config.byte_rate(64_000), 64_000);
    }

    #[test]
    fn test_builder_clamps_zero_values() {
        let config = EngineConfig::default()
            .bitrate_divisor(0)
            .chunk_size(0)
            .listener_capacity(0)
            .fallback_bitrate(0);

        assert_eq!(config.bitrate_divisor, 1);
        assert_eq!(config.chunk_size, 1);
        assert_eq!(config.listener_capacity, 1);
        assert_eq!(config.fallback_bitrate, 1);
    }

    #[test]
    fn test_builder_chaining() {
        let config = EngineConfig::default()
            .tool_path("/usr/local/bin/sox")
            .probe_timeout(Duration::from_millis(250))
            .volumes(0.8, 0.3)
            .default_source("song.mp3")
            .clip_directory("fx");

        assert_eq!(config.tool_path, PathBuf::from("/usr/local/bin/sox"));
        assert_eq!(config.probe_timeout, Duration::from_millis(250));
        assert_eq!(config.source_volume, 0.8);
        assert_eq!(config.clip_volume, 0.3);
        assert_eq!(config.default_source, PathBuf::from("song.mp3"));
        assert_eq!(config.clip_directory, PathBuf::from("fx"));
    }
}
