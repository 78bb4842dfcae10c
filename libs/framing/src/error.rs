//! Framing Error Types

use thiserror::Error;

/// Errors raised by the framing engine.
///
/// Failures are always scoped to a single connection; nothing here is
/// process-fatal.
#[derive(Error, Debug)]
pub enum FramingError {
    /// I/O failure on the underlying socket
    #[error("i/o error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// The factory could not decode a header or reported an inconsistent
    /// body size
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// The processor has already been closed
    #[error("socket processor is closed")]
    Closed,
}

/// Result type alias for framing operations
pub type Result<T> = std::result::Result<T, FramingError>;

impl FramingError {
    /// Create an I/O error with its source
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}
