//! Error types
//!
//! Only [`Error::SourceNotFound`] and [`Error::InvalidState`] ever reach the
//! caller of an engine control method. Component failures (probe, mixer,
//! listener writes) are absorbed where they happen and logged.

use std::io;
use std::path::PathBuf;

use crate::session::SessionState;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// The source file could not be opened
    SourceNotFound {
        /// Path that was requested
        path: PathBuf,
        /// Underlying I/O error
        source: io::Error,
    },
    /// A control call is not valid from the current session state
    InvalidState {
        /// Operation that was rejected
        operation: &'static str,
        /// State the session was in
        state: SessionState,
    },
    /// No effect clip matched the requested name
    ClipNotFound(String),
    /// Any other I/O error
    Io(io::Error),
}

impl Error {
    /// Whether this error left the session untouched
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Error::InvalidState { .. })
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::SourceNotFound { path, source } => {
                write!(f, "Source not found: {} ({})", path.display(), source)
            }
            Error::InvalidState { operation, state } => {
                write!(f, "Cannot {} while {:?}", operation, state)
            }
            Error::ClipNotFound(name) => write!(f, "Effect clip not found: {}", name),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::SourceNotFound { source, .. } => Some(source),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}
