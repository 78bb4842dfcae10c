//! Call/response matching through the test-harness listener.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use rpc::{
    CallDetails, CallRequest, CallResponse, RpcError, ServiceCallHandler, ServiceListener,
    TestServiceListener,
};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use url::Url;

struct ChannelHandler(mpsc::UnboundedSender<CallDetails>);

#[async_trait]
impl ServiceCallHandler for ChannelHandler {
    async fn on_service_call(&self, details: CallDetails) {
        let _ = self.0.send(details);
    }
}

fn harness() -> (
    Arc<TestServiceListener>,
    mpsc::UnboundedReceiver<CallDetails>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let listener = TestServiceListener::new(
        Url::parse("test://harness").unwrap(),
        Arc::new(ChannelHandler(tx)),
    );
    (listener, rx)
}

fn ok_reply(payload: Bytes) -> Vec<Bytes> {
    vec![CallResponse { faulted: false }.encode(), payload]
}

#[tokio::test]
async fn echo_call_completes_with_the_echoed_payload() {
    let (listener, mut rx) = harness();

    let responder = {
        let listener = Arc::clone(&listener);
        tokio::spawn(async move {
            let details = rx.recv().await.unwrap();

            let (request, payload) = CallRequest::decode(&details.body).unwrap();
            assert_eq!(request, CallRequest::new("Echo", "Ping"));
            assert_eq!(&payload[..], b"hello");

            listener.respond(&details, ok_reply(payload)).await.unwrap();
        })
    };

    let reply = timeout(
        Duration::from_secs(5),
        listener.call("Echo", "Ping", b"hello"),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(&reply[..], b"hello");
    assert_eq!(listener.outstanding(), 0);
    responder.await.unwrap();
}

#[tokio::test]
async fn faulted_response_fails_the_call() {
    let (listener, mut rx) = harness();

    let responder = {
        let listener = Arc::clone(&listener);
        tokio::spawn(async move {
            let details = rx.recv().await.unwrap();
            let buffers = vec![
                CallResponse { faulted: true }.encode(),
                Bytes::from_static(b"kaboom"),
            ];
            listener.respond(&details, buffers).await.unwrap();
        })
    };

    let result = listener.call("Echo", "Ping", b"hello").await;

    match result {
        Err(RpcError::CallFailed { message }) => assert_eq!(message, "kaboom"),
        other => panic!("expected a failed call, got {other:?}"),
    }
    responder.await.unwrap();
}

#[tokio::test]
async fn replies_match_their_calls_regardless_of_order() {
    let (listener, mut rx) = harness();

    let responder = {
        let listener = Arc::clone(&listener);
        tokio::spawn(async move {
            let mut calls = Vec::new();
            for _ in 0..3 {
                calls.push(rx.recv().await.unwrap());
            }

            // Answer in reverse arrival order; correlation must still route
            // each reply to its own caller.
            for details in calls.iter().rev() {
                let (_, payload) = CallRequest::decode(&details.body).unwrap();
                listener.respond(details, ok_reply(payload)).await.unwrap();
            }
        })
    };

    let (a, b, c) = tokio::join!(
        listener.call("Svc", "M", b"alpha"),
        listener.call("Svc", "M", b"beta"),
        listener.call("Svc", "M", b"gamma"),
    );

    assert_eq!(&a.unwrap()[..], b"alpha");
    assert_eq!(&b.unwrap()[..], b"beta");
    assert_eq!(&c.unwrap()[..], b"gamma");
    responder.await.unwrap();
}

#[tokio::test]
async fn duplicate_respond_is_a_silent_noop() {
    let (listener, mut rx) = harness();

    let call = {
        let listener = Arc::clone(&listener);
        tokio::spawn(async move { listener.call("Svc", "M", b"once").await })
    };

    let details = rx.recv().await.unwrap();
    listener
        .respond(&details, ok_reply(Bytes::from_static(b"first")))
        .await
        .unwrap();

    assert_eq!(&call.await.unwrap().unwrap()[..], b"first");

    // The key was consumed; a second respond succeeds without reaching
    // anyone.
    listener
        .respond(&details, ok_reply(Bytes::from_static(b"second")))
        .await
        .unwrap();
}

#[tokio::test]
async fn stop_fails_outstanding_calls() {
    let (listener, mut rx) = harness();

    let call = {
        let listener = Arc::clone(&listener);
        tokio::spawn(async move { listener.call("Svc", "M", b"never answered").await })
    };

    // The call is dispatched but no one responds.
    let _details = rx.recv().await.unwrap();
    assert_eq!(listener.outstanding(), 1);

    listener.stop().await.unwrap();

    let result = call.await.unwrap();
    assert!(matches!(result, Err(RpcError::CallFailed { .. })));
    assert_eq!(listener.outstanding(), 0);
}
