//! Error types for loopcast
//!
//! Every variant is fatal for the run. Nothing is retried: all operations are
//! deterministic and local except the external encoder, whose diagnostics are
//! carried verbatim.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for loopcast
#[derive(Error, Debug)]
pub enum Error {
    /// Source file missing, empty, or rejected by the decoder
    #[error("Source unreadable ({}): {reason}", .path.display())]
    SourceUnreadable { path: PathBuf, reason: String },

    /// Source decoded to zero frames
    #[error("Source audio is empty")]
    EmptySource,

    /// Crossfade at least as long as the source cannot be looped
    #[error("Cannot loop: crossfade {crossfade_ms}ms is not shorter than source {source_ms}ms")]
    DegenerateLoop { crossfade_ms: u64, source_ms: u64 },

    /// Crossfade precondition violated on a combine
    #[error("Invalid crossfade: {0}")]
    InvalidCrossfade(String),

    /// Negative or otherwise unusable duration
    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    /// Buffers with different sample rates or channel layouts
    #[error("Incompatible audio formats: {0}")]
    IncompatibleFormat(String),

    /// Synthesized output length does not match the duration contract
    #[error("Output duration invariant violated: expected {expected_frames} frames, got {actual_frames}")]
    UnreachableTarget {
        expected_frames: u64,
        actual_frames: u64,
    },

    /// Writing or reading a persisted chunk failed
    #[error("Chunk storage error: {0}")]
    ChunkStorage(String),

    /// Audio encoding or transcoding failed
    #[error("Encode failed: {0}")]
    EncodeFailed(String),

    /// Video mux failed; `diagnostics` holds the encoder's stderr
    #[error("Video mux failed: {reason}\n{diagnostics}")]
    MuxFailed { reason: String, diagnostics: String },

    /// A step exceeded its time budget
    #[error("Timed out after {seconds}s: {step}")]
    Timeout { step: String, seconds: u64 },

    /// Run cancelled at a chunk boundary
    #[error("Cancelled")]
    Cancelled,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<loopcast_common::Error> for Error {
    fn from(err: loopcast_common::Error) -> Self {
        match err {
            loopcast_common::Error::Io(e) => Error::Io(e),
            other => Error::Config(other.to_string()),
        }
    }
}

/// Convenience Result type using loopcast Error
pub type Result<T> = std::result::Result<T, Error>;
