//! Common error types for loopcast

use thiserror::Error;

/// Common result type for loopcast-common operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the shared library
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),
}
