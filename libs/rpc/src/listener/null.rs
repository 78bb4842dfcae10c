//! Null Service Listener

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use super::{CallDetails, ListenerCore, ServiceListener};
use crate::error::{Result, RpcError};

/// Safe placeholder for configurations that require a transport object
/// without wiring one up. Start and Stop are accepted as no-ops; every
/// response attempt fails.
pub struct NullServiceListener {
    core: ListenerCore,
    endpoint: Url,
}

impl NullServiceListener {
    pub fn new(endpoint: Url) -> Self {
        Self {
            core: ListenerCore::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl ServiceListener for NullServiceListener {
    fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn system_id(&self) -> u64 {
        self.core.system_id()
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    async fn respond(&self, _details: &CallDetails, _buffers: Vec<Bytes>) -> Result<()> {
        Err(RpcError::routing("null listener cannot respond"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::MessageEnvelope;

    #[tokio::test]
    async fn start_stop_are_noops_and_respond_fails() {
        let listener = NullServiceListener::new(Url::parse("null://nowhere").unwrap());

        listener.start().await.unwrap();
        listener.start().await.unwrap();
        listener.stop().await.unwrap();
        listener.stop().await.unwrap();

        let details = CallDetails {
            envelope: MessageEnvelope::default(),
            body: Bytes::new(),
            call_id: 1,
            processor_id: None,
        };
        let result = listener.respond(&details, Vec::new()).await;
        assert!(matches!(result, Err(RpcError::Routing { .. })));
    }
}
