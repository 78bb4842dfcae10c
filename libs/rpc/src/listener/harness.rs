//! Test Service Listener
//!
//! Client-side harness that validates call encoding and dispatch logic
//! without any real transport. A call allocates a correlation ID, stores a
//! pending future under the correlation key, and dispatches the service
//! call directly; a matching respond completes the stored future.

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::{Bytes, BytesMut};
use tokio::sync::oneshot;
use tracing::debug;
use url::Url;

use super::{dispatch_call, CallDetails, ListenerCore, ServiceCallHandler, ServiceListener};
use crate::correlation::{CorrelationKey, PendingCalls};
use crate::envelope::{message_type, MessageEnvelope};
use crate::error::{Result, RpcError};

/// Names the service and method a call targets. Encoded ahead of the call
/// payload as two length-prefixed strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub service: String,
    pub method: String,
}

impl CallRequest {
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        let mut buffer = Vec::new();
        write_string(&mut buffer, &self.service)?;
        write_string(&mut buffer, &self.method)?;
        Ok(Bytes::from(buffer))
    }

    /// Decodes the request prefix, returning it and the remaining payload.
    pub fn decode(body: &Bytes) -> Result<(Self, Bytes)> {
        let mut cursor = Cursor::new(body.as_ref());
        let service = read_string(&mut cursor)?;
        let method = read_string(&mut cursor)?;
        let consumed = cursor.position() as usize;
        Ok((Self { service, method }, body.slice(consumed..)))
    }
}

/// Response prefix: a one-byte fault flag ahead of the reply payload. When
/// the flag is set, the payload carries the fault message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallResponse {
    pub faulted: bool,
}

impl CallResponse {
    pub fn encode(&self) -> Bytes {
        Bytes::copy_from_slice(&[u8::from(self.faulted)])
    }

    /// Decodes the response prefix, returning it and the remaining payload.
    pub fn decode(body: &Bytes) -> Result<(Self, Bytes)> {
        let Some(&flag) = body.first() else {
            return Err(RpcError::protocol("response body is empty"));
        };
        Ok((Self { faulted: flag != 0 }, body.slice(1..)))
    }
}

fn write_string(buffer: &mut Vec<u8>, value: &str) -> Result<()> {
    if value.len() > u16::MAX as usize {
        return Err(RpcError::protocol("string too long to encode"));
    }
    buffer.write_u16::<LittleEndian>(value.len() as u16)?;
    buffer.extend_from_slice(value.as_bytes());
    Ok(())
}

fn read_string(cursor: &mut Cursor<&[u8]>) -> Result<String> {
    let length = cursor.read_u16::<LittleEndian>()? as usize;
    let start = cursor.position() as usize;
    let end = start + length;
    if end > cursor.get_ref().len() {
        return Err(RpcError::protocol("truncated string"));
    }

    let value = String::from_utf8(cursor.get_ref()[start..end].to_vec())
        .map_err(|_| RpcError::protocol("string is not valid utf-8"))?;
    cursor.set_position(end as u64);
    Ok(value)
}

type PendingReply = oneshot::Sender<Result<Bytes>>;

pub struct TestServiceListener {
    core: ListenerCore,
    endpoint: Url,
    handler: Arc<dyn ServiceCallHandler>,
    pending: PendingCalls<PendingReply>,
}

impl TestServiceListener {
    pub fn new(endpoint: Url, handler: Arc<dyn ServiceCallHandler>) -> Arc<Self> {
        Arc::new(Self {
            core: ListenerCore::new(),
            endpoint,
            handler,
            pending: PendingCalls::new(),
        })
    }

    /// Issues a call and resolves once the matching respond arrives.
    pub async fn call(&self, service: &str, method: &str, payload: &[u8]) -> Result<Bytes> {
        let mut data = BytesMut::new();
        data.extend_from_slice(&CallRequest::new(service, method).encode()?);
        data.extend_from_slice(payload);
        let data = data.freeze();

        let envelope = MessageEnvelope {
            message_type: message_type::SERVICE_REQUEST,
            data_length: data.len() as u32,
            message_system_id: self.core.system_id(),
            message_correlation_id: self.core.allocate_correlation_id(),
            ..MessageEnvelope::default()
        };

        let key = CorrelationKey::from_message(&envelope);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.register(key, reply_tx);

        let details = CallDetails {
            envelope,
            body: data,
            call_id: self.core.allocate_call_id(),
            processor_id: None,
        };
        dispatch_call(Arc::clone(&self.handler), details);

        match reply_rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(RpcError::call_failed(
                "call abandoned before a response arrived",
            )),
        }
    }

    /// Calls awaiting a response.
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }
}

#[async_trait]
impl ServiceListener for TestServiceListener {
    fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn system_id(&self) -> u64 {
        self.core.system_id()
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Fails every outstanding call; there is no transport to tear down.
    async fn stop(&self) -> Result<()> {
        let abandoned = self.pending.drain();
        if !abandoned.is_empty() {
            debug!(count = abandoned.len(), "failing outstanding calls on stop");
        }
        for reply in abandoned {
            let _ = reply.send(Err(RpcError::call_failed("listener stopped")));
        }
        Ok(())
    }

    async fn respond(&self, details: &CallDetails, buffers: Vec<Bytes>) -> Result<()> {
        let mut data = BytesMut::new();
        for buffer in &buffers {
            data.extend_from_slice(buffer);
        }
        let data = data.freeze();
        let (response, payload) = CallResponse::decode(&data)?;

        let key = CorrelationKey::from_message(&details.envelope);
        // Find-and-remove: a late or duplicate respond is a silent no-op.
        let Some(reply) = self.pending.complete(&key) else {
            return Ok(());
        };

        let outcome = if response.faulted {
            Err(RpcError::call_failed(
                String::from_utf8_lossy(&payload).into_owned(),
            ))
        } else {
            Ok(payload)
        };

        // The caller may have given up and dropped its future.
        let _ = reply.send(outcome);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_request_round_trips_with_payload() {
        let request = CallRequest::new("Echo", "Ping");
        let mut body = BytesMut::new();
        body.extend_from_slice(&request.encode().unwrap());
        body.extend_from_slice(b"hello");

        let (decoded, payload) = CallRequest::decode(&body.freeze()).unwrap();
        assert_eq!(decoded, request);
        assert_eq!(&payload[..], b"hello");
    }

    #[test]
    fn call_request_rejects_truncation() {
        let encoded = CallRequest::new("Echo", "Ping").encode().unwrap();
        let truncated = encoded.slice(..encoded.len() - 2);

        assert!(CallRequest::decode(&truncated).is_err());
    }

    #[test]
    fn call_response_flag_round_trips() {
        let mut body = BytesMut::new();
        body.extend_from_slice(&CallResponse { faulted: true }.encode());
        body.extend_from_slice(b"boom");

        let (decoded, payload) = CallResponse::decode(&body.freeze()).unwrap();
        assert!(decoded.faulted);
        assert_eq!(&payload[..], b"boom");
    }

    #[test]
    fn call_response_rejects_empty_body() {
        assert!(CallResponse::decode(&Bytes::new()).is_err());
    }
}
