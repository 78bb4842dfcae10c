//! In-process routing and endpoint registration.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use rpc::{
    message_type, CallDetails, InProcessRouter, InProcessServiceListener, MessageEnvelope,
    RpcError, ServiceCallHandler, ServiceListener,
};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout, Duration};
use url::Url;

struct ChannelHandler(mpsc::UnboundedSender<CallDetails>);

#[async_trait]
impl ServiceCallHandler for ChannelHandler {
    async fn on_service_call(&self, details: CallDetails) {
        let _ = self.0.send(details);
    }
}

fn endpoint(name: &str) -> Url {
    Url::parse(&format!("inproc://{name}")).unwrap()
}

fn request(system_id: u64, correlation_id: u64, body_len: usize) -> MessageEnvelope {
    MessageEnvelope {
        message_type: message_type::SERVICE_REQUEST,
        data_length: body_len as u32,
        message_system_id: system_id,
        message_correlation_id: correlation_id,
        ..MessageEnvelope::default()
    }
}

#[tokio::test]
async fn call_round_trips_with_a_flipped_envelope() {
    let router = InProcessRouter::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let listener = InProcessServiceListener::new(
        endpoint("calc"),
        Arc::new(ChannelHandler(tx)),
        Arc::clone(&router),
    )
    .unwrap();

    let (reply_tx, reply_rx) = oneshot::channel();
    let body = Bytes::from_static(b"hello");
    router
        .call(
            &endpoint("calc"),
            request(99, 1, body.len()),
            body,
            Box::new(move |envelope, buffers| {
                let _ = reply_tx.send((envelope, buffers));
            }),
        )
        .unwrap();

    let details = timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&details.body[..], b"hello");
    assert!(details.processor_id.is_none());

    listener
        .respond(&details, vec![details.body.clone()])
        .await
        .unwrap();

    let (envelope, buffers) = timeout(Duration::from_secs(5), reply_rx)
        .await
        .unwrap()
        .unwrap();

    assert!(envelope.is_response());
    assert_eq!(envelope.response_system_id, 99);
    assert_eq!(envelope.response_correlation_id, 1);
    assert_eq!(envelope.message_system_id, listener.system_id());
    assert_eq!(envelope.data_length, 5);
    assert_eq!(&buffers[0][..], b"hello");
}

#[tokio::test]
async fn second_registration_fails_and_the_first_survives() {
    let router = InProcessRouter::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _first = InProcessServiceListener::new(
        endpoint("shared"),
        Arc::new(ChannelHandler(tx)),
        Arc::clone(&router),
    )
    .unwrap();

    let (tx2, _rx2) = mpsc::unbounded_channel();
    let second = InProcessServiceListener::new(
        endpoint("shared"),
        Arc::new(ChannelHandler(tx2)),
        Arc::clone(&router),
    );
    assert!(matches!(second, Err(RpcError::AlreadyRegistered { .. })));

    // The original registration still receives calls.
    router
        .call(
            &endpoint("shared"),
            request(1, 1, 2),
            Bytes::from_static(b"ok"),
            Box::new(|_, _| {}),
        )
        .unwrap();
    let details = timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&details.body[..], b"ok");
}

#[tokio::test]
async fn unknown_endpoint_is_a_routing_error() {
    let router = InProcessRouter::new();

    let result = router.call(
        &endpoint("ghost"),
        request(1, 1, 0),
        Bytes::new(),
        Box::new(|_, _| {}),
    );

    assert!(matches!(result, Err(RpcError::Routing { .. })));
}

#[tokio::test]
async fn stop_unregisters_and_start_reregisters() {
    let router = InProcessRouter::new();
    let (tx, _rx) = mpsc::unbounded_channel();
    let listener = InProcessServiceListener::new(
        endpoint("cycle"),
        Arc::new(ChannelHandler(tx)),
        Arc::clone(&router),
    )
    .unwrap();

    // Start on a freshly constructed listener is a no-op.
    listener.start().await.unwrap();
    assert_eq!(router.endpoint_count(), 1);

    listener.stop().await.unwrap();
    listener.stop().await.unwrap();
    assert_eq!(router.endpoint_count(), 0);

    let result = router.call(
        &endpoint("cycle"),
        request(1, 1, 0),
        Bytes::new(),
        Box::new(|_, _| {}),
    );
    assert!(matches!(result, Err(RpcError::Routing { .. })));

    listener.start().await.unwrap();
    assert_eq!(router.endpoint_count(), 1);
}

#[tokio::test]
async fn late_respond_is_a_silent_noop() {
    let router = InProcessRouter::new();
    let (tx, _rx) = mpsc::unbounded_channel();
    let listener = InProcessServiceListener::new(
        endpoint("quiet"),
        Arc::new(ChannelHandler(tx)),
        Arc::clone(&router),
    )
    .unwrap();

    // No call registered this key; respond must succeed without effect.
    let details = CallDetails {
        envelope: request(42, 7, 0),
        body: Bytes::new(),
        call_id: 1,
        processor_id: None,
    };
    listener.respond(&details, Vec::new()).await.unwrap();
}
