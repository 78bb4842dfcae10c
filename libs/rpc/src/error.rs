//! RPC Transport Error Types
//!
//! Failures are scoped to one connection or one outstanding call; nothing
//! in this crate is process-fatal.

use framing::FramingError;
use thiserror::Error;

/// Main error type for the RPC transport layer
#[derive(Error, Debug)]
pub enum RpcError {
    /// Connection-level failure surfaced by the framing engine
    #[error("transport error: {0}")]
    Transport(#[from] FramingError),

    /// Malformed envelope or call payload
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// A response could not be routed to its originating connection or
    /// endpoint
    #[error("routing error: {message}")]
    Routing { message: String },

    /// An in-process endpoint is already registered
    #[error("endpoint already registered: {endpoint}")]
    AlreadyRegistered { endpoint: String },

    /// Invalid endpoint or listener configuration
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// The service reported a fault, or the call was abandoned before a
    /// response arrived
    #[error("service call failed: {message}")]
    CallFailed { message: String },

    /// Generic I/O errors
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for RPC operations
pub type Result<T> = std::result::Result<T, RpcError>;

impl RpcError {
    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a routing error
    pub fn routing(message: impl Into<String>) -> Self {
        Self::Routing {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a failed-call error
    pub fn call_failed(message: impl Into<String>) -> Self {
        Self::CallFailed {
            message: message.into(),
        }
    }
}
