//! Broadcast session
//!
//! A [`StreamingEngine`] owns exactly one [`Session`]. Every state change goes
//! through the engine's control methods:
//!
//! ```text
//!            start                 inject_effect
//!   Idle ──────────────► Streaming ─────────────► Merging
//!    ▲                     │   ▲                     │
//!    │        stop /       │   └── merge output ─────┘
//!    └──── source ended ───┴──────── ends ◄──────────┘ stop
//! ```

pub mod command;
pub mod engine;
pub mod state;

pub use command::{Command, CommandOutcome};
pub use engine::{InjectOutcome, StreamingEngine};
pub use state::{Session, SessionState, Source};
