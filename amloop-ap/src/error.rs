//! Error types for amloop-ap
//!
//! Defines module-specific error types using thiserror for clear error propagation.

use crate::playback::graph::VoiceId;
use thiserror::Error;

/// Main error type for amloop-ap
#[derive(Error, Debug)]
pub enum Error {
    /// Errors bubbled up from amloop-common
    #[error(transparent)]
    Common(#[from] amloop_common::Error),

    /// Configuration validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Audio decoding errors
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// One clip failed to fetch or decode
    #[error("Failed to load clip '{clip}': {reason}")]
    LoadFailure { clip: String, reason: String },

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// No usable audio clock/output in this environment
    #[error("Unsupported audio environment: {0}")]
    UnsupportedEnvironment(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using amloop-ap Error
pub type Result<T> = std::result::Result<T, Error>;

/// Best-effort scheduling failure on a voice
///
/// Expected whenever a cancel or supersede races a voice that is already
/// stopped or released. Callers discard it explicitly; it is never
/// propagated as an engine error.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingConflict {
    /// Voice was already disconnected from the graph
    #[error("voice {0:?} is no longer connected")]
    Disconnected(VoiceId),

    /// Voice was already started
    #[error("voice {0:?} already started")]
    AlreadyStarted(VoiceId),

    /// Voice already has a stop scheduled
    #[error("voice {0:?} already stopped")]
    AlreadyStopped(VoiceId),

    /// Graph has been closed
    #[error("audio graph is closed")]
    GraphClosed,
}
