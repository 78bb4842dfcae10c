//! Message Framing Engine
//!
//! Turns a byte stream into discrete (header, body) frames and back. The wire
//! protocol is pluggable through `MessageFactory`; complete frames are handed
//! to a `MessageProcessor` together with disconnect and network-fault
//! notifications. One `SocketProcessor` drives one connection.

pub mod error;
pub mod message;
pub mod pool;
pub mod processor;

pub use error::{FramingError, Result};
pub use message::{MessageFactory, MessageProcessor, ReadMode};
pub use pool::{BufferPool, SlabBufferPool};
pub use processor::SocketProcessor;

use std::sync::atomic::{AtomicU64, Ordering};

static PROCESSOR_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Allocates the stable ID a socket processor is registered under.
pub fn next_processor_id() -> u64 {
    PROCESSOR_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}
