//! End-to-end endpoint behavior over an in-memory wire.
//!
//! Each test builds an endpoint whose writer feeds one side of a duplex
//! pipe; the test reads frames off the far end to observe exactly what the
//! remote peer would see.

use futures::FutureExt;
use glint_rpc::{
    codec, Client, Dispatcher, Endpoint, ErrorKind, ErrorObject, MessageReader, MessageWriter,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{duplex, BufReader, DuplexStream};
use tokio::time::timeout;

struct Harness {
    endpoint: Endpoint,
    wire: BufReader<DuplexStream>,
}

fn harness(dispatcher: Dispatcher) -> Harness {
    let (tx, rx) = duplex(64 * 1024);
    let writer = Arc::new(MessageWriter::new(tx));
    let endpoint = Endpoint::new(dispatcher, Client::new(writer));
    Harness {
        endpoint,
        wire: BufReader::new(rx),
    }
}

impl Harness {
    /// Next frame the remote peer would receive, with a deadline so a
    /// missing write fails the test instead of hanging it.
    async fn next_write(&mut self) -> Value {
        timeout(Duration::from_secs(3), codec::read_frame(&mut self.wire))
            .await
            .expect("timed out waiting for a write")
            .expect("transport error")
            .expect("stream closed")
    }

    /// Assert no frame arrives within a short grace period.
    async fn expect_no_write(&mut self) {
        let result = timeout(Duration::from_millis(200), codec::read_frame(&mut self.wire)).await;
        assert!(result.is_err(), "unexpected write: {:?}", result);
    }
}

#[tokio::test]
async fn bad_message_does_not_panic() {
    let mut h = harness(Dispatcher::new());
    h.endpoint.consume(json!({"key": "value"})).await;
    h.endpoint.consume(json!(null)).await;
    h.endpoint.consume(json!([1, 2, 3])).await;
    h.expect_no_write().await;
}

#[tokio::test]
async fn notify_writes_notification() {
    let mut h = harness(Dispatcher::new());
    h.endpoint
        .notify("methodName", Some(json!({"key": "value"})))
        .await;

    assert_eq!(
        h.next_write().await,
        json!({"jsonrpc": "2.0", "method": "methodName", "params": {"key": "value"}})
    );
}

#[tokio::test]
async fn notify_none_params_omits_field() {
    let mut h = harness(Dispatcher::new());
    h.endpoint.notify("methodName", None).await;

    assert_eq!(
        h.next_write().await,
        json!({"jsonrpc": "2.0", "method": "methodName"})
    );
}

#[tokio::test]
async fn request_resolves_from_consumed_response() {
    let mut h = harness(Dispatcher::new());
    let call = h
        .endpoint
        .request("methodName", Some(json!({"key": "value"})))
        .await;

    let written = h.next_write().await;
    assert_eq!(written["method"], "methodName");
    let id = written["id"].clone();

    h.endpoint
        .consume(json!({"jsonrpc": "2.0", "id": id, "result": 1234}))
        .await;

    assert_eq!(call.wait().await.unwrap(), json!(1234));
}

#[tokio::test]
async fn request_rejects_from_error_response() {
    let mut h = harness(Dispatcher::new());
    let call = h.endpoint.request("methodName", None).await;
    let id = h.next_write().await["id"].clone();

    let error = ErrorObject::invalid_request().with_data(json!(1234));
    h.endpoint
        .consume(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": serde_json::to_value(&error).unwrap()
        }))
        .await;

    assert_eq!(call.wait().await.unwrap_err(), error);
}

#[tokio::test]
async fn request_cancel_notifies_peer_and_rejects_locally() {
    let mut h = harness(Dispatcher::new());
    let mut call = h.endpoint.request("methodName", None).await;
    let id = h.next_write().await["id"].clone();

    call.cancel().await;

    let cancel = h.next_write().await;
    assert_eq!(cancel["method"], "$/cancelRequest");
    assert_eq!(cancel["params"]["id"], id);

    let err = call.wait().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RequestCancelled);
}

#[tokio::test]
async fn duplicate_response_resolves_once() {
    let mut h = harness(Dispatcher::new());
    let call = h.endpoint.request("methodName", None).await;
    let id = h.next_write().await["id"].clone();

    h.endpoint
        .consume(json!({"jsonrpc": "2.0", "id": id, "result": 1}))
        .await;
    h.endpoint
        .consume(json!({"jsonrpc": "2.0", "id": id, "result": 2}))
        .await;

    assert_eq!(call.wait().await.unwrap(), json!(1));
    h.expect_no_write().await;
}

#[tokio::test]
async fn unexpected_response_is_dropped() {
    let mut h = harness(Dispatcher::new());
    h.endpoint
        .consume(json!({"jsonrpc": "2.0", "id": 42, "result": 1}))
        .await;
    h.expect_no_write().await;
}

#[tokio::test]
async fn notification_invokes_handler() {
    let mut dispatcher = Dispatcher::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    dispatcher.register_sync("methodName", move |params| {
        assert_eq!(params, Some(json!({"key": "value"})));
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Null)
    });

    let mut h = harness(dispatcher);
    h.endpoint
        .consume(json!({
            "jsonrpc": "2.0",
            "method": "methodName",
            "params": {"key": "value"}
        }))
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    // Notifications never produce a response.
    h.expect_no_write().await;
}

#[tokio::test]
async fn notification_handler_error_is_swallowed() {
    let mut dispatcher = Dispatcher::new();
    dispatcher.register_sync("methodName", |_| {
        Err(ErrorObject::internal_error().of("boom"))
    });

    let mut h = harness(dispatcher);
    h.endpoint
        .consume(json!({"jsonrpc": "2.0", "method": "methodName"}))
        .await;
    h.expect_no_write().await;
}

#[tokio::test]
async fn async_notification_handler_error_is_swallowed() {
    let mut dispatcher = Dispatcher::new();
    dispatcher.register_async("methodName", |_| {
        async { Err(ErrorObject::internal_error().of("boom")) }.boxed()
    });

    let mut h = harness(dispatcher);
    h.endpoint
        .consume(json!({"jsonrpc": "2.0", "method": "methodName"}))
        .await;
    h.expect_no_write().await;
}

#[tokio::test]
async fn unknown_notification_is_dropped() {
    let mut h = harness(Dispatcher::new());
    h.endpoint
        .consume(json!({"jsonrpc": "2.0", "method": "methodName"}))
        .await;
    h.expect_no_write().await;
}

#[tokio::test]
async fn request_unknown_method_gets_method_not_found() {
    let mut h = harness(Dispatcher::new());
    h.endpoint
        .consume(json!({
            "jsonrpc": "2.0",
            "id": "id",
            "method": "methodName",
            "params": {"key": "value"}
        }))
        .await;

    let response = h.next_write().await;
    assert_eq!(response["id"], "id");
    assert_eq!(response["error"]["code"], -32601);
    assert_eq!(
        response["error"]["message"],
        "Method Not Found: methodName"
    );
}

#[tokio::test]
async fn sync_handler_success() {
    let mut dispatcher = Dispatcher::new();
    dispatcher.register_sync("methodName", |params| {
        assert_eq!(params, Some(json!({"key": "value"})));
        Ok(json!(1234))
    });

    let mut h = harness(dispatcher);
    h.endpoint
        .consume(json!({
            "jsonrpc": "2.0",
            "id": "id",
            "method": "methodName",
            "params": {"key": "value"}
        }))
        .await;

    assert_eq!(
        h.next_write().await,
        json!({"jsonrpc": "2.0", "id": "id", "result": 1234})
    );
}

#[tokio::test]
async fn async_handler_indistinguishable_from_sync() {
    let mut dispatcher = Dispatcher::new();
    dispatcher.register_async("methodName", |params| {
        async move {
            assert_eq!(params, Some(json!({"key": "value"})));
            Ok(json!(1234))
        }
        .boxed()
    });

    let mut h = harness(dispatcher);
    h.endpoint
        .consume(json!({
            "jsonrpc": "2.0",
            "id": "id",
            "method": "methodName",
            "params": {"key": "value"}
        }))
        .await;

    // Same wire shape as the sync case.
    assert_eq!(
        h.next_write().await,
        json!({"jsonrpc": "2.0", "id": "id", "result": 1234})
    );
}

#[tokio::test]
async fn sync_handler_error_becomes_error_response() {
    let mut dispatcher = Dispatcher::new();
    dispatcher.register_sync("methodName", |_| {
        Err(ErrorObject::internal_error().of("ValueError"))
    });

    let mut h = harness(dispatcher);
    h.endpoint
        .consume(json!({"jsonrpc": "2.0", "id": "id", "method": "methodName"}))
        .await;

    let response = h.next_write().await;
    assert_eq!(response["error"]["code"], -32603);
    assert_eq!(response["error"]["message"], "Internal Error: ValueError");
    assert!(response.get("result").is_none());
}

#[tokio::test]
async fn async_handler_error_becomes_error_response() {
    let mut dispatcher = Dispatcher::new();
    dispatcher.register_async("methodName", |_| {
        async { Err(ErrorObject::method_not_found()) }.boxed()
    });

    let mut h = harness(dispatcher);
    h.endpoint
        .consume(json!({"jsonrpc": "2.0", "id": "id", "method": "methodName"}))
        .await;

    let response = h.next_write().await;
    assert_eq!(response["error"]["code"], -32601);
}

#[tokio::test]
async fn cancel_inflight_request_sends_request_cancelled() {
    let mut dispatcher = Dispatcher::new();
    dispatcher.register_async("methodName", |_| {
        async {
            // Parks until cancelled; the select in the endpoint drops us.
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(json!("never"))
        }
        .boxed()
    });

    let mut h = harness(dispatcher);
    h.endpoint
        .consume(json!({"jsonrpc": "2.0", "id": "id", "method": "methodName"}))
        .await;

    h.endpoint
        .consume(json!({
            "jsonrpc": "2.0",
            "method": "$/cancelRequest",
            "params": {"id": "id"}
        }))
        .await;

    let response = h.next_write().await;
    assert_eq!(response["id"], "id");
    assert_eq!(response["error"]["code"], -32800);
    h.expect_no_write().await;
}

#[tokio::test]
async fn cancel_unknown_id_is_noop() {
    let mut h = harness(Dispatcher::new());
    h.endpoint
        .consume(json!({
            "jsonrpc": "2.0",
            "method": "$/cancelRequest",
            "params": {"id": "unknown identifier"}
        }))
        .await;
    h.expect_no_write().await;
}

#[tokio::test]
async fn cancel_after_completion_is_noop() {
    let mut dispatcher = Dispatcher::new();
    dispatcher.register_async("methodName", |_| async { Ok(json!(1)) }.boxed());

    let mut h = harness(dispatcher);
    h.endpoint
        .consume(json!({"jsonrpc": "2.0", "id": 9, "method": "methodName"}))
        .await;

    let response = h.next_write().await;
    assert_eq!(response["result"], json!(1));

    // Completion already responded; the late cancel must not produce a
    // second response.
    h.endpoint
        .consume(json!({
            "jsonrpc": "2.0",
            "method": "$/cancelRequest",
            "params": {"id": 9}
        }))
        .await;
    h.expect_no_write().await;
}

#[tokio::test]
async fn duplicate_inflight_request_id_is_dropped() {
    let mut dispatcher = Dispatcher::new();
    let starts = Arc::new(AtomicUsize::new(0));
    let counter = starts.clone();
    dispatcher.register_async("methodName", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Value::Null)
        }
        .boxed()
    });

    let mut h = harness(dispatcher);
    let request = json!({"jsonrpc": "2.0", "id": "dup", "method": "methodName"});
    h.endpoint.consume(request.clone()).await;
    h.endpoint.consume(request).await;

    // Only the first execution started; the duplicate wrote nothing.
    assert_eq!(starts.load(Ordering::SeqCst), 1);
    h.expect_no_write().await;
}

#[tokio::test]
async fn concurrent_async_requests_respond_out_of_order() {
    let mut dispatcher = Dispatcher::new();
    dispatcher.register_async("slow", |_| {
        async {
            tokio::time::sleep(Duration::from_millis(150)).await;
            Ok(json!("slow"))
        }
        .boxed()
    });
    dispatcher.register_async("fast", |_| async { Ok(json!("fast")) }.boxed());

    let mut h = harness(dispatcher);
    h.endpoint
        .consume(json!({"jsonrpc": "2.0", "id": 1, "method": "slow"}))
        .await;
    h.endpoint
        .consume(json!({"jsonrpc": "2.0", "id": 2, "method": "fast"}))
        .await;

    // Whichever completes first writes first; correlation is by id.
    let first = h.next_write().await;
    let second = h.next_write().await;
    assert_eq!(first["id"], 2);
    assert_eq!(first["result"], "fast");
    assert_eq!(second["id"], 1);
    assert_eq!(second["result"], "slow");
}

#[tokio::test]
async fn reader_feeds_endpoint_end_to_end() {
    let mut dispatcher = Dispatcher::new();
    dispatcher.register_sync("ping", |_| Ok(json!("pong")));

    let (mut client_tx, server_rx) = duplex(64 * 1024);
    let (server_tx, mut client_rx) = duplex(64 * 1024);

    let writer = Arc::new(MessageWriter::new(server_tx));
    let endpoint = Endpoint::new(dispatcher, Client::new(writer));

    let reader_task = {
        let endpoint = endpoint.clone();
        tokio::spawn(async move {
            MessageReader::new(BufReader::new(server_rx))
                .listen(&endpoint)
                .await;
            endpoint.close().await;
        })
    };

    use tokio::io::AsyncWriteExt;
    let request: glint_rpc::Message =
        glint_rpc::Request::new(glint_rpc::RequestId::Number(1), "ping", None).into();
    client_tx
        .write_all(&codec::encode_frame(&request).unwrap())
        .await
        .unwrap();

    let mut wire = BufReader::new(&mut client_rx);
    let response = codec::read_frame(&mut wire).await.unwrap().unwrap();
    assert_eq!(response["result"], "pong");

    drop(client_tx);
    timeout(Duration::from_secs(3), reader_task)
        .await
        .expect("reader loop did not terminate")
        .unwrap();
}
