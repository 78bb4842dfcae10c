//! Service Listener RPC Transport
//!
//! A process exposes or invokes services through a `ServiceListener`
//! without knowing whether the peer is reached over TCP, lives in the same
//! process, or is a test double. This crate layers the service-listener
//! abstraction and its correlation mechanism over the framing engine:
//! inbound frames become service calls dispatched to an injected handler,
//! and responses are matched back to the exact outstanding call through a
//! (system ID, correlation ID) key.

pub mod correlation;
pub mod envelope;
pub mod error;
pub mod factory;
pub mod listener;

pub use correlation::{CorrelationKey, PendingCalls};
pub use envelope::{message_type, MessageEnvelope, ENVELOPE_SIZE};
pub use error::{Result, RpcError};
pub use factory::EnvelopeMessageFactory;
pub use listener::{
    CallDetails, CallRequest, CallResponse, InProcessRouter, InProcessServiceListener,
    InProcessTarget, ListenerRegistry, NetworkListenerConfig, NetworkServiceListener,
    NullServiceListener, ReplyCallback, ServiceCallHandler, ServiceListener, TestServiceListener,
};

use std::sync::atomic::{AtomicU64, Ordering};

static SYSTEM_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Allocates the process-scoped system ID a listener identifies itself by.
pub fn next_system_id() -> u64 {
    SYSTEM_ID_COUNTER.fetch_add(1, Ordering::SeqCst) + 1
}
