//! In-Process Service Listener
//!
//! Serves same-process caller/callee pairs with no socket and no
//! serialization boundary. Endpoints live in an explicitly constructed
//! router. Each inbound call stores its reply callback under the
//! correlation key before the handler is dispatched, so a respond can
//! find-and-remove it synchronously.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, warn};
use url::Url;

use super::{dispatch_call, CallDetails, ListenerCore, ServiceCallHandler, ServiceListener};
use crate::correlation::{CorrelationKey, PendingCalls};
use crate::envelope::MessageEnvelope;
use crate::error::{Result, RpcError};

/// Completion path handed to the endpoint for one in-process call. Invoked
/// at most once, with the response envelope and the reply buffers.
pub type ReplyCallback = Box<dyn FnOnce(MessageEnvelope, Vec<Bytes>) + Send + 'static>;

/// Receives calls routed to one registered endpoint.
pub trait InProcessTarget: Send + Sync {
    fn deliver(&self, envelope: MessageEnvelope, data: Bytes, reply: ReplyCallback);
}

/// Endpoint-keyed router for in-process calls.
///
/// Explicitly constructed and passed to every party that needs it; there is
/// no ambient process-wide table.
pub struct InProcessRouter {
    routes: Mutex<HashMap<String, Arc<dyn InProcessTarget>>>,
}

impl InProcessRouter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            routes: Mutex::new(HashMap::new()),
        })
    }

    /// Registers `target` under `endpoint`. Fails when the endpoint is
    /// already taken; the existing registration stays usable.
    pub fn register(&self, endpoint: &Url, target: Arc<dyn InProcessTarget>) -> Result<()> {
        let mut routes = self.routes.lock();
        if routes.contains_key(endpoint.as_str()) {
            return Err(RpcError::AlreadyRegistered {
                endpoint: endpoint.to_string(),
            });
        }
        routes.insert(endpoint.as_str().to_string(), target);
        Ok(())
    }

    /// Removes the registration for `endpoint`, if any.
    pub fn unregister(&self, endpoint: &Url) -> bool {
        self.routes.lock().remove(endpoint.as_str()).is_some()
    }

    /// Routes a call to the endpoint's listener.
    pub fn call(
        &self,
        endpoint: &Url,
        envelope: MessageEnvelope,
        data: Bytes,
        reply: ReplyCallback,
    ) -> Result<()> {
        let target = self.routes.lock().get(endpoint.as_str()).cloned();
        let Some(target) = target else {
            return Err(RpcError::routing(format!(
                "no endpoint registered at {endpoint}"
            )));
        };

        // Delivery happens outside the routing lock.
        target.deliver(envelope, data, reply);
        Ok(())
    }

    pub fn endpoint_count(&self) -> usize {
        self.routes.lock().len()
    }
}

pub struct InProcessServiceListener {
    core: ListenerCore,
    endpoint: Url,
    handler: Arc<dyn ServiceCallHandler>,
    router: Arc<InProcessRouter>,
    me: Weak<InProcessServiceListener>,
    callbacks: PendingCalls<ReplyCallback>,
    registered: AtomicBool,
}

impl InProcessServiceListener {
    /// Creates the listener and registers it with the router. Fails loudly
    /// when the endpoint is already registered; the existing listener is
    /// untouched.
    pub fn new(
        endpoint: Url,
        handler: Arc<dyn ServiceCallHandler>,
        router: Arc<InProcessRouter>,
    ) -> Result<Arc<Self>> {
        let listener = Arc::new_cyclic(|me| Self {
            core: ListenerCore::new(),
            endpoint,
            handler,
            router,
            me: me.clone(),
            callbacks: PendingCalls::new(),
            registered: AtomicBool::new(false),
        });

        listener.router.register(
            &listener.endpoint,
            Arc::clone(&listener) as Arc<dyn InProcessTarget>,
        )?;
        listener.registered.store(true, Ordering::SeqCst);

        Ok(listener)
    }
}

#[async_trait]
impl ServiceListener for InProcessServiceListener {
    fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn system_id(&self) -> u64 {
        self.core.system_id()
    }

    async fn start(&self) -> Result<()> {
        // Construction already registered the endpoint; re-register only
        // after a stop.
        if self.registered.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let Some(me) = self.me.upgrade() else {
            return Ok(());
        };
        match self
            .router
            .register(&self.endpoint, me as Arc<dyn InProcessTarget>)
        {
            Ok(()) => Ok(()),
            Err(error) => {
                self.registered.store(false, Ordering::SeqCst);
                Err(error)
            }
        }
    }

    async fn stop(&self) -> Result<()> {
        if !self.registered.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        self.router.unregister(&self.endpoint);

        let discarded = self.callbacks.drain();
        if !discarded.is_empty() {
            debug!(
                endpoint = %self.endpoint,
                count = discarded.len(),
                "discarding outstanding reply callbacks"
            );
        }

        Ok(())
    }

    async fn respond(&self, details: &CallDetails, buffers: Vec<Bytes>) -> Result<()> {
        let key = CorrelationKey::from_message(&details.envelope);

        // Find-and-remove: a late or duplicate respond is a silent no-op.
        let Some(reply) = self.callbacks.complete(&key) else {
            return Ok(());
        };

        let mut response = self.core.create_response(&details.envelope);
        response.data_length = buffers.iter().map(Bytes::len).sum::<usize>() as u32;

        reply(response, buffers);
        Ok(())
    }
}

impl InProcessTarget for InProcessServiceListener {
    fn deliver(&self, envelope: MessageEnvelope, data: Bytes, reply: ReplyCallback) {
        let key = CorrelationKey::from_message(&envelope);
        if !self.callbacks.register(key, reply) {
            warn!(?key, "correlation key already outstanding, dropping call");
            return;
        }

        let details = CallDetails {
            envelope,
            body: data,
            call_id: self.core.allocate_call_id(),
            processor_id: None,
        };

        // Dispatch on a worker task to avoid re-entering the caller's
        // stack.
        dispatch_call(Arc::clone(&self.handler), details);
    }
}
