//! Body Buffer Pool
//!
//! Message bodies are read into pooled buffers so that sustained throughput
//! does not allocate per frame. Buffers are checked out per frame and
//! returned to the pool exactly once per read cycle, success or failure.

use bytes::BytesMut;
use parking_lot::Mutex;

/// Checkout/checkin of byte buffers by size.
///
/// Checkout sizes vary per call, and a buffer may be returned from a
/// different thread than the one that took it.
pub trait BufferPool: Send + Sync {
    /// Returns an empty buffer with capacity for at least `size` bytes.
    fn checkout(&self, size: usize) -> BytesMut;

    /// Returns a buffer to the pool.
    fn checkin(&self, buffer: BytesMut);
}

/// Free-list pool of reusable `BytesMut` buffers.
///
/// Checkout reuses the first retained buffer with sufficient capacity and
/// falls back to a fresh allocation. The free list is bounded so a burst of
/// large messages cannot pin memory indefinitely.
pub struct SlabBufferPool {
    free: Mutex<Vec<BytesMut>>,
    max_retained: usize,
}

impl SlabBufferPool {
    pub fn new(max_retained: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            max_retained,
        }
    }

    /// Number of buffers currently sitting in the free list.
    pub fn retained(&self) -> usize {
        self.free.lock().len()
    }
}

impl Default for SlabBufferPool {
    fn default() -> Self {
        Self::new(32)
    }
}

impl BufferPool for SlabBufferPool {
    fn checkout(&self, size: usize) -> BytesMut {
        let reused = {
            let mut free = self.free.lock();
            free.iter()
                .position(|buffer| buffer.capacity() >= size)
                .map(|index| free.swap_remove(index))
        };

        match reused {
            Some(buffer) => buffer,
            None => BytesMut::with_capacity(size),
        }
    }

    fn checkin(&self, mut buffer: BytesMut) {
        buffer.clear();
        let mut free = self.free.lock();
        if free.len() < self.max_retained {
            free.push(buffer);
        }
    }
}
