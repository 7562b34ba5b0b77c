//! livecast: a live audio broadcast engine
//!
//! Plays one audio file at its native bitrate, paces it to real time and fans
//! the paced bytes out to any number of listeners. Short effect clips can be
//! mixed into the live feed through an external tool (`sox` by default)
//! without interrupting the listeners.
//!
//! ```text
//!   file ──► Pacer ──► Broadcaster ──► listener 1
//!             ▲                   ├──► listener 2
//!             │ splice            └──► ...
//!        EffectInjector ◄── mixer process (live + clip)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use livecast::{EngineConfig, StreamingEngine};
//!
//! #[tokio::main]
//! async fn main() -> livecast::Result<()> {
//!     let engine = StreamingEngine::new(EngineConfig::default());
//!     let (_id, mut listener) = engine.register_listener().await;
//!
//!     engine.start("audio/songs/conversation.mp3").await?;
//!     while let Some(chunk) = listener.recv().await {
//!         println!("{} bytes", chunk.len());
//!     }
//!     Ok(())
//! }
//! ```

pub mod broadcast;
pub mod config;
pub mod effect;
pub mod error;
pub mod pacer;
pub mod probe;
pub mod registry;
pub mod session;
pub mod stats;

#[cfg(test)]
mod testutil;

pub use broadcast::{Broadcaster, TickReport};
pub use config::EngineConfig;
pub use effect::{ClipLibrary, EffectInjector, EffectRequest, MixError};
pub use error::{Error, Result};
pub use pacer::{PacedStream, PacerHandle, PacerStatus};
pub use probe::{BitrateProbe, ProbeError};
pub use registry::{ListenerId, ListenerRegistry, ListenerStream, ListenerWriteError};
pub use session::{Command, CommandOutcome, InjectOutcome, SessionState, Source, StreamingEngine};
pub use stats::BroadcastStats;
