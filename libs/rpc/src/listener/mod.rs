//! Service Listener Abstraction
//!
//! A listener presents one transport endpoint behind a uniform
//! Start/Stop/Respond surface and raises a service-call notification for
//! every complete inbound request. Notifications are always dispatched on a
//! spawned worker task, never on the accept or read task, so handlers must
//! not assume a particular execution context.

mod harness;
mod inproc;
mod network;
mod null;
mod registry;

pub use harness::{CallRequest, CallResponse, TestServiceListener};
pub use inproc::{InProcessRouter, InProcessServiceListener, InProcessTarget, ReplyCallback};
pub use network::{NetworkListenerConfig, NetworkServiceListener};
pub use null::NullServiceListener;
pub use registry::ListenerRegistry;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::envelope::{message_type, MessageEnvelope};
use crate::error::Result;
use crate::next_system_id;

/// One complete inbound request: its envelope, its body, the call ID the
/// listener allocated for it, and the originating connection when the call
/// arrived over the network.
#[derive(Debug, Clone)]
pub struct CallDetails {
    pub envelope: MessageEnvelope,
    pub body: Bytes,
    pub call_id: u64,
    pub processor_id: Option<u64>,
}

/// Injected handler invoked for every inbound service call.
#[async_trait]
pub trait ServiceCallHandler: Send + Sync + 'static {
    async fn on_service_call(&self, details: CallDetails);
}

/// Transport-agnostic endpoint exposing Start/Stop/Respond.
#[async_trait]
pub trait ServiceListener: Send + Sync {
    /// The endpoint this listener serves.
    fn endpoint(&self) -> &Url;

    /// Process-scoped unique ID for this listener instance.
    fn system_id(&self) -> u64;

    /// Begins accepting or receiving calls. Idempotent.
    async fn start(&self) -> Result<()>;

    /// Stops accepting and tears down owned resources. Idempotent.
    async fn stop(&self) -> Result<()>;

    /// Sends a reply associated with a previously received call. Failure is
    /// scoped to that one call.
    async fn respond(&self, details: &CallDetails, buffers: Vec<Bytes>) -> Result<()>;
}

/// Identity shared by every listener variant: the system ID plus the
/// per-instance correlation and call counters.
pub(crate) struct ListenerCore {
    system_id: u64,
    correlation_ids: AtomicU64,
    call_ids: AtomicU64,
}

impl ListenerCore {
    pub(crate) fn new() -> Self {
        Self {
            system_id: next_system_id(),
            correlation_ids: AtomicU64::new(0),
            call_ids: AtomicU64::new(0),
        }
    }

    pub(crate) fn system_id(&self) -> u64 {
        self.system_id
    }

    pub(crate) fn allocate_correlation_id(&self) -> u64 {
        self.correlation_ids.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn allocate_call_id(&self) -> u64 {
        self.call_ids.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Builds a response envelope from the request it answers: fresh sender
    /// identity, `response_*` fields echoing the request's `message_*`
    /// fields, session fields carried through, and the response bit set on
    /// the message type.
    pub(crate) fn create_response(&self, template: &MessageEnvelope) -> MessageEnvelope {
        MessageEnvelope {
            message_type: template.message_type | message_type::RESPONSE_BIT,
            data_length: 0,
            message_system_id: self.system_id,
            message_correlation_id: self.allocate_correlation_id(),
            response_system_id: template.message_system_id,
            response_correlation_id: template.message_correlation_id,
            session_high: template.session_high,
            session_low: template.session_low,
        }
    }
}

/// Dispatches a service call on a worker task.
pub(crate) fn dispatch_call(handler: Arc<dyn ServiceCallHandler>, details: CallDetails) {
    tokio::spawn(async move {
        handler.on_service_call(details).await;
    });
}
