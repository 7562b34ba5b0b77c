//! Effect injection
//!
//! Splices a short clip into the live feed. The live source is detached from
//! the pacer and piped into an external mixer together with the clip; the
//! mixer's output is paced in its place until it ends, after which the live
//! source continues where the mixer left it.
//!
//! ```text
//!   source ──► feeder ──► mixer stdin ┐
//!                          clip file ─┼─► mixer ──► stdout ──► pacer ──► broadcaster
//!   (source handed back to the pacer once the feeder is done)
//! ```

pub mod feeder;
pub mod injector;
pub mod library;
pub mod mixer;

use std::path::PathBuf;

use crate::config::EngineConfig;

pub use injector::{EffectInjector, Splice};
pub use library::ClipLibrary;
pub use mixer::{MixError, MixProcess};

/// A single request to mix a clip into the live feed
#[derive(Debug, Clone, PartialEq)]
pub struct EffectRequest {
    /// Clip file to mix in
    pub clip: PathBuf,
    /// Volume multiplier for the live source
    pub source_volume: f32,
    /// Volume multiplier for the clip
    pub clip_volume: f32,
}

impl EffectRequest {
    /// Request for `clip` at the configured volumes
    pub fn new(clip: impl Into<PathBuf>, config: &EngineConfig) -> Self {
        Self {
            clip: clip.into(),
            source_volume: config.source_volume,
            clip_volume: config.clip_volume,
        }
    }

    /// Override both volumes
    pub fn volumes(mut self, source: f32, clip: f32) -> Self {
        self.source_volume = source;
        self.clip_volume = clip;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_uses_configured_volumes() {
        let config = EngineConfig::default().volumes(0.7, 0.2);
        let request = EffectRequest::new("fx/applause.mp3", &config);

        assert_eq!(request.clip, PathBuf::from("fx/applause.mp3"));
        assert_eq!(request.source_volume, 0.7);
        assert_eq!(request.clip_volume, 0.2);

        let request = request.volumes(1.0, 0.5);
        assert_eq!(request.source_volume, 1.0);
        assert_eq!(request.clip_volume, 0.5);
    }
}
