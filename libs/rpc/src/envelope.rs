//! Service Message Envelope
//!
//! Wire protocol header preceding each message body. The layout is fixed at
//! 64 little-endian bytes, bracketed by begin/end magic numbers so a
//! desynchronized stream is detected at the next header boundary. The
//! `data_length` field declares how many body bytes follow the envelope on
//! the wire.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;

use crate::error::{Result, RpcError};

/// Message type values carried in the envelope.
///
/// The low bit distinguishes requests (clear) from responses (set); a
/// response's type is the request's type with the response bit ORed in, so
/// no separate enumeration value per request kind is needed.
pub mod message_type {
    /// Bit flagging a message as a response to an earlier request
    pub const RESPONSE_BIT: u32 = 1;

    pub const SERVICE_REQUEST: u32 = 2;
    pub const SERVICE_RESPONSE: u32 = 3;
    pub const PING: u32 = 4;
    pub const PONG: u32 = 5;
}

const BEGIN_MAGIC: u32 = 0x5941_5250;
const END_MAGIC: u32 = 0x7961_7270;

/// Fixed envelope size on the wire, in bytes
pub const ENVELOPE_SIZE: usize = 64;

/// Identity and length fields carried ahead of every message body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageEnvelope {
    pub message_type: u32,
    /// Byte length of the body that follows the envelope on the wire
    pub data_length: u32,
    /// System ID of the endpoint that sent this message
    pub message_system_id: u64,
    /// Correlation ID the sender allocated for this message
    pub message_correlation_id: u64,
    /// On a response, the original request's `message_system_id`
    pub response_system_id: u64,
    /// On a response, the original request's `message_correlation_id`
    pub response_correlation_id: u64,
    pub session_high: u64,
    pub session_low: u64,
}

impl MessageEnvelope {
    /// Whether the response bit is set on the message type.
    pub fn is_response(&self) -> bool {
        self.message_type & message_type::RESPONSE_BIT != 0
    }

    /// Serializes the envelope to its wire form.
    pub fn encode(&self) -> Result<Bytes> {
        let mut buffer = Vec::with_capacity(ENVELOPE_SIZE);

        buffer.write_u32::<LittleEndian>(BEGIN_MAGIC)?;
        buffer.write_u32::<LittleEndian>(self.message_type)?;
        buffer.write_u32::<LittleEndian>(self.data_length)?;
        buffer.write_u64::<LittleEndian>(self.message_system_id)?;
        buffer.write_u64::<LittleEndian>(self.message_correlation_id)?;
        buffer.write_u64::<LittleEndian>(self.response_system_id)?;
        buffer.write_u64::<LittleEndian>(self.response_correlation_id)?;
        buffer.write_u64::<LittleEndian>(self.session_high)?;
        buffer.write_u64::<LittleEndian>(self.session_low)?;
        buffer.write_u32::<LittleEndian>(END_MAGIC)?;

        Ok(Bytes::from(buffer))
    }

    /// Parses an envelope from exactly `ENVELOPE_SIZE` bytes, validating
    /// both magic numbers.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < ENVELOPE_SIZE {
            return Err(RpcError::protocol(format!(
                "envelope needs {ENVELOPE_SIZE} bytes, got {}",
                bytes.len()
            )));
        }

        let mut cursor = Cursor::new(bytes);

        let begin = cursor.read_u32::<LittleEndian>()?;
        if begin != BEGIN_MAGIC {
            return Err(RpcError::protocol("begin magic number not found"));
        }

        let envelope = Self {
            message_type: cursor.read_u32::<LittleEndian>()?,
            data_length: cursor.read_u32::<LittleEndian>()?,
            message_system_id: cursor.read_u64::<LittleEndian>()?,
            message_correlation_id: cursor.read_u64::<LittleEndian>()?,
            response_system_id: cursor.read_u64::<LittleEndian>()?,
            response_correlation_id: cursor.read_u64::<LittleEndian>()?,
            session_high: cursor.read_u64::<LittleEndian>()?,
            session_low: cursor.read_u64::<LittleEndian>()?,
        };

        let end = cursor.read_u32::<LittleEndian>()?;
        if end != END_MAGIC {
            return Err(RpcError::protocol("end magic number not found"));
        }

        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MessageEnvelope {
        MessageEnvelope {
            message_type: message_type::SERVICE_REQUEST,
            data_length: 128,
            message_system_id: 7,
            message_correlation_id: 42,
            response_system_id: 0,
            response_correlation_id: 0,
            session_high: 11,
            session_low: 12,
        }
    }

    #[test]
    fn round_trips_through_wire_form() {
        let envelope = sample();

        let bytes = envelope.encode().unwrap();
        assert_eq!(bytes.len(), ENVELOPE_SIZE);

        let decoded = MessageEnvelope::decode(&bytes).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn rejects_short_input() {
        let result = MessageEnvelope::decode(&[0u8; ENVELOPE_SIZE - 1]);
        assert!(matches!(result, Err(RpcError::Protocol { .. })));
    }

    #[test]
    fn rejects_bad_begin_magic() {
        let mut bytes = sample().encode().unwrap().to_vec();
        bytes[0] ^= 0xFF;

        let result = MessageEnvelope::decode(&bytes);
        assert!(matches!(result, Err(RpcError::Protocol { .. })));
    }

    #[test]
    fn rejects_bad_end_magic() {
        let mut bytes = sample().encode().unwrap().to_vec();
        bytes[ENVELOPE_SIZE - 1] ^= 0xFF;

        let result = MessageEnvelope::decode(&bytes);
        assert!(matches!(result, Err(RpcError::Protocol { .. })));
    }

    #[test]
    fn low_bit_marks_responses() {
        let mut envelope = sample();
        assert!(!envelope.is_response());

        envelope.message_type |= message_type::RESPONSE_BIT;
        assert!(envelope.is_response());
        assert_eq!(envelope.message_type, message_type::SERVICE_RESPONSE);
    }
}
