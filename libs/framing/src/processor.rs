//! Framed Message Socket Processor
//!
//! Drives one TCP connection: a fixed-size header is read and decoded, the
//! body length it declares is read into a pooled buffer, and the resulting
//! (header, body) frame is handed to the message processor. Reads and writes
//! share a single failure-classification path so that errors produced by an
//! intentional close are never surfaced as faults.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

use crate::error::{FramingError, Result};
use crate::message::{MessageFactory, MessageProcessor, ReadMode};
use crate::next_processor_id;

/// Outcome of filling a buffer from the socket.
enum Fill {
    Full,
    Disconnected,
    Aborted,
}

/// Owns one connection and its read/write protocol loop.
///
/// Exactly one read operation is in flight at a time; many processors run
/// concurrently, one per connection.
pub struct SocketProcessor<F: MessageFactory> {
    id: u64,
    peer_addr: Option<SocketAddr>,
    factory: Arc<F>,
    handler: Arc<dyn MessageProcessor<F>>,
    me: Weak<SocketProcessor<F>>,
    reader: Mutex<Option<OwnedReadHalf>>,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    reading: AtomicBool,
    closed: AtomicBool,
}

impl<F: MessageFactory> SocketProcessor<F> {
    pub fn new(
        stream: TcpStream,
        factory: Arc<F>,
        handler: Arc<dyn MessageProcessor<F>>,
    ) -> Arc<Self> {
        let peer_addr = stream.peer_addr().ok();
        let (read_half, write_half) = stream.into_split();

        Arc::new_cyclic(|me| Self {
            id: next_processor_id(),
            peer_addr,
            factory,
            handler,
            me: me.clone(),
            reader: Mutex::new(Some(read_half)),
            writer: tokio::sync::Mutex::new(write_half),
            reading: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// Stable ID, used as the registry key for this connection.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Starts the asynchronous read loop.
    ///
    /// A processor whose previous loop ended via `ReadMode::StopReading`
    /// can be started again; a second start while a loop is running is a
    /// no-op.
    pub fn start(&self) {
        if self.reading.swap(true, Ordering::SeqCst) {
            return;
        }

        let Some(processor) = self.me.upgrade() else {
            self.reading.store(false, Ordering::SeqCst);
            return;
        };
        tokio::spawn(async move {
            processor.read_loop().await;
        });
    }

    /// Closes the processor.
    ///
    /// Idempotent: the underlying socket is shut down exactly once even
    /// under concurrent callers. The closed flag is set before the socket
    /// is touched so in-flight reads and writes classify the resulting
    /// failures as expected teardown noise.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!(id = self.id, peer = ?self.peer_addr, "closing socket processor");

        let mut writer = self.writer.lock().await;
        if let Err(error) = writer.shutdown().await {
            trace!(id = self.id, %error, "socket shutdown failed");
        }
    }

    /// Writes the buffers to the socket, resolving once the send completes.
    ///
    /// A failed write notifies the network-fault handler and fails the
    /// returned future; it is never left pending. Writing on a closed
    /// processor fails immediately without raising a fault.
    pub async fn write(&self, buffers: &[Bytes]) -> Result<()> {
        if self.is_closed() {
            return Err(FramingError::Closed);
        }

        let mut writer = self.writer.lock().await;
        for buffer in buffers {
            if let Err(error) = writer.write_all(buffer).await {
                drop(writer);
                self.raise_fault("write", &error).await;
                return Err(FramingError::io("write failed", error));
            }
        }
        if let Err(error) = writer.flush().await {
            drop(writer);
            self.raise_fault("write flush", &error).await;
            return Err(FramingError::io("write failed", error));
        }

        Ok(())
    }

    async fn read_loop(self: Arc<Self>) {
        let reader = self.reader.lock().take();
        let Some(mut reader) = reader else {
            self.reading.store(false, Ordering::SeqCst);
            return;
        };

        let header_size = self.factory.header_size();
        // The header buffer is retained and reused; its size never changes.
        let mut header_buf = vec![0u8; header_size];
        let pool = Arc::clone(self.factory.body_pool());

        loop {
            match self.fill(&mut reader, &mut header_buf).await {
                Fill::Full => {}
                Fill::Disconnected => {
                    self.handler.handle_disconnect(&self).await;
                    return;
                }
                Fill::Aborted => return,
            }

            let header = match self.factory.create_header(&header_buf) {
                Ok(header) => header,
                Err(error) => {
                    self.raise_fault("header decode", &error).await;
                    return;
                }
            };

            let body_size = self.factory.body_size(&header);
            let mut body_buf = pool.checkout(body_size);
            body_buf.resize(body_size, 0);

            let filled = self.fill(&mut reader, &mut body_buf).await;
            let body = match filled {
                Fill::Full => self.factory.create_body(&header, &body_buf[..body_size]),
                Fill::Disconnected => {
                    pool.checkin(body_buf);
                    self.handler.handle_disconnect(&self).await;
                    return;
                }
                Fill::Aborted => {
                    pool.checkin(body_buf);
                    return;
                }
            };
            pool.checkin(body_buf);

            let body = match body {
                Ok(body) => body,
                Err(error) => {
                    self.raise_fault("body decode", &error).await;
                    return;
                }
            };

            match self.handler.process_message(&self, header, body).await {
                ReadMode::KeepReading => {}
                ReadMode::StopReading => {
                    trace!(id = self.id, "message processor stopped the read loop");
                    *self.reader.lock() = Some(reader);
                    self.reading.store(false, Ordering::SeqCst);
                    return;
                }
            }
        }
    }

    /// Fills `buf` completely, accumulating partial reads.
    async fn fill(&self, reader: &mut OwnedReadHalf, buf: &mut [u8]) -> Fill {
        let mut filled = 0;
        while filled < buf.len() {
            match reader.read(&mut buf[filled..]).await {
                // A zero-byte read is an orderly peer disconnect, not an
                // error.
                Ok(0) => return Fill::Disconnected,
                Ok(count) => filled += count,
                Err(error) => {
                    self.raise_fault("read", &error).await;
                    return Fill::Aborted;
                }
            }
        }

        Fill::Full
    }

    /// Classifies a failed network call.
    ///
    /// Failures after an intentional close are an expected side effect of
    /// the teardown and are only traced; anything else raises a network
    /// fault exactly once.
    async fn raise_fault(&self, context: &str, error: &(dyn std::fmt::Display + Send + Sync)) {
        if self.closed.load(Ordering::SeqCst) {
            trace!(id = self.id, %error, "{context} failed after close");
            return;
        }

        warn!(id = self.id, peer = ?self.peer_addr, %error, "{context} failed");
        if let Some(me) = self.me.upgrade() {
            self.handler.handle_network_fault(&me).await;
        }
    }
}
