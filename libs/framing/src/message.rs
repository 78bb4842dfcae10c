//! Message Factory and Processor Interfaces
//!
//! The framing engine is protocol-agnostic: a `MessageFactory` decodes the
//! fixed-size header, declares the body length it implies, and builds the
//! body object; a `MessageProcessor` receives every complete frame plus
//! disconnect and network-fault notifications.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::pool::BufferPool;
use crate::processor::SocketProcessor;

/// Continuation directive returned by a message processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Keep the read loop running
    KeepReading,
    /// Stop issuing reads without closing the connection
    StopReading,
}

/// Produces headers and bodies from raw bytes for one wire protocol.
pub trait MessageFactory: Send + Sync + 'static {
    type Header: Send + Sync + 'static;
    type Body: Send + Sync + 'static;

    /// Fixed byte size of the wire header.
    fn header_size(&self) -> usize;

    /// Decodes a header from exactly `header_size()` bytes.
    fn create_header(&self, bytes: &[u8]) -> Result<Self::Header>;

    /// Byte length of the body implied by `header`.
    fn body_size(&self, header: &Self::Header) -> usize;

    /// Builds the body object. `bytes` is exactly the declared body size;
    /// pooled slack is never part of the slice.
    fn create_body(&self, header: &Self::Header, bytes: &[u8]) -> Result<Self::Body>;

    /// The pool body buffers are checked out from.
    fn body_pool(&self) -> &Arc<dyn BufferPool>;
}

/// Receives complete frames and connection-state notifications from a
/// socket processor. Exactly one instance serves each processor.
#[async_trait]
pub trait MessageProcessor<F: MessageFactory>: Send + Sync + 'static {
    /// Called once per complete (header, body) frame, in arrival order.
    async fn process_message(
        &self,
        source: &Arc<SocketProcessor<F>>,
        header: F::Header,
        body: F::Body,
    ) -> ReadMode;

    /// Called when the peer disconnects in an orderly fashion.
    async fn handle_disconnect(&self, source: &Arc<SocketProcessor<F>>);

    /// Called when a network call fails while the processor is not being
    /// intentionally closed.
    async fn handle_network_fault(&self, source: &Arc<SocketProcessor<F>>);
}
