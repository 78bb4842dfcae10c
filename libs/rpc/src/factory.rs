//! Envelope Message Factory
//!
//! Adapts the envelope codec to the framing engine: the frame header is a
//! `MessageEnvelope` and the body is the raw bytes it declares. Body
//! buffers come from a shared slab pool.

use std::sync::Arc;

use bytes::Bytes;
use framing::{BufferPool, FramingError, MessageFactory, SlabBufferPool};

use crate::envelope::{MessageEnvelope, ENVELOPE_SIZE};

/// Default cap on the declared body length (16 MiB)
pub const DEFAULT_MAX_DATA_LENGTH: usize = 16 * 1024 * 1024;

pub struct EnvelopeMessageFactory {
    pool: Arc<dyn BufferPool>,
    max_data_length: usize,
}

impl EnvelopeMessageFactory {
    pub fn new(max_data_length: usize) -> Self {
        Self {
            pool: Arc::new(SlabBufferPool::default()),
            max_data_length,
        }
    }
}

impl Default for EnvelopeMessageFactory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DATA_LENGTH)
    }
}

impl MessageFactory for EnvelopeMessageFactory {
    type Header = MessageEnvelope;
    type Body = Bytes;

    fn header_size(&self) -> usize {
        ENVELOPE_SIZE
    }

    fn create_header(&self, bytes: &[u8]) -> framing::Result<MessageEnvelope> {
        let envelope = MessageEnvelope::decode(bytes)
            .map_err(|error| FramingError::protocol(error.to_string()))?;

        if envelope.data_length as usize > self.max_data_length {
            return Err(FramingError::protocol(format!(
                "declared body size {} exceeds maximum {}",
                envelope.data_length, self.max_data_length
            )));
        }

        Ok(envelope)
    }

    fn body_size(&self, header: &MessageEnvelope) -> usize {
        header.data_length as usize
    }

    fn create_body(&self, _header: &MessageEnvelope, bytes: &[u8]) -> framing::Result<Bytes> {
        Ok(Bytes::copy_from_slice(bytes))
    }

    fn body_pool(&self) -> &Arc<dyn BufferPool> {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::message_type;

    #[test]
    fn decodes_headers_and_reports_body_size() {
        let factory = EnvelopeMessageFactory::default();
        let envelope = MessageEnvelope {
            message_type: message_type::SERVICE_REQUEST,
            data_length: 96,
            message_system_id: 1,
            message_correlation_id: 2,
            ..MessageEnvelope::default()
        };

        let header = factory.create_header(&envelope.encode().unwrap()).unwrap();
        assert_eq!(header, envelope);
        assert_eq!(factory.body_size(&header), 96);
    }

    #[test]
    fn rejects_oversized_bodies() {
        let factory = EnvelopeMessageFactory::new(64);
        let envelope = MessageEnvelope {
            data_length: 65,
            ..MessageEnvelope::default()
        };

        let result = factory.create_header(&envelope.encode().unwrap());
        assert!(matches!(result, Err(FramingError::Protocol { .. })));
    }

    #[test]
    fn body_is_exactly_the_given_bytes() {
        let factory = EnvelopeMessageFactory::default();
        let header = MessageEnvelope {
            data_length: 5,
            ..MessageEnvelope::default()
        };

        let body = factory.create_body(&header, b"hello").unwrap();
        assert_eq!(&body[..], b"hello");
    }
}
