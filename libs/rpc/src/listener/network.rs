//! Network Service Listener
//!
//! Serves an endpoint over TCP. Every accepted connection becomes a socket
//! processor registered in a lock-guarded map; inbound service requests are
//! repackaged into call details and dispatched on a worker task so the I/O
//! task stays free. Responses are written back through the originating
//! processor.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use framing::{MessageProcessor, ReadMode, SocketProcessor};

use super::{dispatch_call, CallDetails, ListenerCore, ServiceCallHandler, ServiceListener};
use crate::envelope::{message_type, MessageEnvelope};
use crate::error::{Result, RpcError};
use crate::factory::{EnvelopeMessageFactory, DEFAULT_MAX_DATA_LENGTH};

/// Network listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkListenerConfig {
    /// Disable Nagle's algorithm on accepted connections
    pub nodelay: bool,
    /// Maximum body size accepted from a peer
    pub max_data_length: usize,
}

impl Default for NetworkListenerConfig {
    fn default() -> Self {
        Self {
            nodelay: true,
            max_data_length: DEFAULT_MAX_DATA_LENGTH,
        }
    }
}

type Processor = Arc<SocketProcessor<EnvelopeMessageFactory>>;

pub struct NetworkServiceListener {
    core: ListenerCore,
    endpoint: Url,
    config: NetworkListenerConfig,
    handler: Arc<dyn ServiceCallHandler>,
    factory: Arc<EnvelopeMessageFactory>,
    me: Weak<NetworkServiceListener>,
    processors: Mutex<HashMap<u64, Processor>>,
    local_addr: Mutex<Option<SocketAddr>>,
    accept_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl NetworkServiceListener {
    pub fn new(
        endpoint: Url,
        config: NetworkListenerConfig,
        handler: Arc<dyn ServiceCallHandler>,
    ) -> Result<Arc<Self>> {
        if endpoint.host_str().is_none() || endpoint.port().is_none() {
            return Err(RpcError::configuration(format!(
                "network endpoint needs a host and port: {endpoint}"
            )));
        }

        let factory = Arc::new(EnvelopeMessageFactory::new(config.max_data_length));

        Ok(Arc::new_cyclic(|me| Self {
            core: ListenerCore::new(),
            endpoint,
            config,
            handler,
            factory,
            me: me.clone(),
            processors: Mutex::new(HashMap::new()),
            local_addr: Mutex::new(None),
            accept_task: tokio::sync::Mutex::new(None),
            stopped: AtomicBool::new(false),
        }))
    }

    /// Address the listener is bound to, available after a successful
    /// `start`.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.processors.lock().len()
    }

    async fn resolve(&self) -> Result<SocketAddr> {
        // Presence was checked at construction.
        let host = self.endpoint.host_str().unwrap_or_default();
        let port = self.endpoint.port().unwrap_or_default();

        let mut addresses = tokio::net::lookup_host((host, port)).await?;
        addresses
            .next()
            .ok_or_else(|| RpcError::configuration(format!("could not resolve host: {host}")))
    }

    fn accept_connection(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        if let Err(error) = stream.set_nodelay(self.config.nodelay) {
            warn!(%error, "failed to set TCP_NODELAY");
        }

        let processor = SocketProcessor::new(
            stream,
            Arc::clone(&self.factory),
            Arc::clone(&self) as Arc<dyn MessageProcessor<EnvelopeMessageFactory>>,
        );

        self.processors
            .lock()
            .insert(processor.id(), Arc::clone(&processor));

        debug!(id = processor.id(), %peer, "accepted connection");
        processor.start();
    }

    /// Removes a processor from the registry and closes it. Afterwards no
    /// operation resolves the connection again.
    async fn retire_processor(&self, processor: &Processor, reason: &str) {
        self.processors.lock().remove(&processor.id());
        debug!(id = processor.id(), reason, "retiring connection");
        processor.close().await;
    }
}

#[async_trait]
impl ServiceListener for NetworkServiceListener {
    fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn system_id(&self) -> u64 {
        self.core.system_id()
    }

    async fn start(&self) -> Result<()> {
        let mut accept_task = self.accept_task.lock().await;
        if accept_task.is_some() {
            debug!(endpoint = %self.endpoint, "listener already started");
            return Ok(());
        }

        let address = self.resolve().await?;
        let tcp_listener = TcpListener::bind(address)
            .await
            .map_err(|error| RpcError::configuration(format!("failed to bind {address}: {error}")))?;
        let local = tcp_listener.local_addr()?;

        self.stopped.store(false, Ordering::SeqCst);
        *self.local_addr.lock() = Some(local);

        let me = self.me.clone();
        *accept_task = Some(tokio::spawn(async move {
            // The accept loop re-arms itself after every connection.
            loop {
                let accepted = tcp_listener.accept().await;
                let Some(listener) = me.upgrade() else { break };

                match accepted {
                    Ok((stream, peer)) => listener.accept_connection(stream, peer),
                    Err(error) => {
                        // The stopped flag is not read atomically with the
                        // accept failure; a stop racing an in-flight accept
                        // can still be misclassified.
                        if listener.stopped.load(Ordering::SeqCst) {
                            debug!(%error, "accept interrupted by stop");
                            break;
                        }
                        warn!(%error, "accept failed");
                    }
                }
            }
        }));

        info!(endpoint = %self.endpoint, %local, "service listener accepting connections");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        // Flag first, so faults produced by the teardown below classify as
        // expected shutdown noise.
        self.stopped.store(true, Ordering::SeqCst);

        let task = self.accept_task.lock().await.take();
        let Some(task) = task else {
            return Ok(());
        };
        task.abort();

        let processors: Vec<Processor> = {
            let mut map = self.processors.lock();
            map.drain().map(|(_, processor)| processor).collect()
        };
        for processor in &processors {
            processor.close().await;
        }

        *self.local_addr.lock() = None;
        info!(endpoint = %self.endpoint, "service listener stopped");
        Ok(())
    }

    async fn respond(&self, details: &CallDetails, buffers: Vec<Bytes>) -> Result<()> {
        let processor_id = details
            .processor_id
            .ok_or_else(|| RpcError::routing("call did not originate from a network connection"))?;

        let processor = self.processors.lock().get(&processor_id).cloned();
        let Some(processor) = processor else {
            return Err(RpcError::routing(format!(
                "originating connection {processor_id} is no longer present"
            )));
        };

        let mut response = self.core.create_response(&details.envelope);
        response.data_length = buffers.iter().map(Bytes::len).sum::<usize>() as u32;

        let mut outbound = Vec::with_capacity(buffers.len() + 1);
        outbound.push(response.encode()?);
        outbound.extend(buffers);

        processor.write(&outbound).await?;
        Ok(())
    }
}

#[async_trait]
impl MessageProcessor<EnvelopeMessageFactory> for NetworkServiceListener {
    async fn process_message(
        &self,
        source: &Arc<SocketProcessor<EnvelopeMessageFactory>>,
        header: MessageEnvelope,
        body: Bytes,
    ) -> ReadMode {
        match header.message_type {
            message_type::SERVICE_REQUEST => {
                let details = CallDetails {
                    envelope: header,
                    body,
                    call_id: self.core.allocate_call_id(),
                    processor_id: Some(source.id()),
                };
                dispatch_call(Arc::clone(&self.handler), details);
            }
            message_type::PING => {
                debug!(id = source.id(), "ping received");
            }
            other => {
                warn!(id = source.id(), message_type = other, "unhandled message type");
            }
        }

        ReadMode::KeepReading
    }

    async fn handle_disconnect(&self, source: &Arc<SocketProcessor<EnvelopeMessageFactory>>) {
        self.retire_processor(source, "peer disconnected").await;
    }

    async fn handle_network_fault(&self, source: &Arc<SocketProcessor<EnvelopeMessageFactory>>) {
        self.retire_processor(source, "network fault").await;
    }
}
