//! Wire-level contract tests for the daemon.
//!
//! Frames are written by hand so the tests pin the exact request and
//! response shapes, independent of the client library.

mod common;

use bugbuddy_protocol::{INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR};
use bytes::{BufMut, BytesMut};
use common::TestDaemon;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

async fn setup_daemon() -> (TestDaemon, TcpStream) {
    let daemon = TestDaemon::start().await.expect("Failed to start daemon");
    let stream = TcpStream::connect(daemon.addr)
        .await
        .expect("Failed to connect to daemon");
    (daemon, stream)
}

async fn write_frame(stream: &mut TcpStream, body: &[u8]) {
    let mut frame = BytesMut::with_capacity(4 + body.len());
    frame.put_u32(body.len() as u32);
    frame.put_slice(body);
    stream.write_all(&frame).await.expect("Failed to write frame");
}

async fn read_frame(stream: &mut TcpStream) -> Value {
    let len = stream.read_u32().await.expect("Failed to read length") as usize;
    let mut body = vec![0; len];
    stream.read_exact(&mut body).await.expect("Failed to read body");
    serde_json::from_slice(&body).expect("Failed to parse response")
}

async fn rpc_call(stream: &mut TcpStream, mut request: Value, id: i64) -> Value {
    request["jsonrpc"] = json!("2.0");
    request["id"] = json!(id);
    write_frame(stream, &serde_json::to_vec(&request).unwrap()).await;
    read_frame(stream).await
}

async fn handshake(stream: &mut TcpStream, pid: u32, client_type: i64) -> Value {
    rpc_call(
        stream,
        json!({
            "method": "$/handshake",
            "params": {"processId": pid, "clientType": client_type},
        }),
        1,
    )
    .await
}

#[tokio::test]
async fn test_handshake_reply_shape() {
    let (daemon, mut stream) = setup_daemon().await;

    let response = handshake(&mut stream, 100, 0).await;

    assert_eq!(response["id"], 1);
    let result = &response["result"];
    assert_eq!(result["success"], true);
    assert!(result["version"].is_string());
    assert_eq!(result["processId"], std::process::id());
    assert_eq!(result["supportedFileExtensions"], json!([".py"]));
    assert!(daemon.registry.contains(100));

    daemon.stop().await;
}

#[tokio::test]
async fn test_identity_errors_have_no_side_effects() {
    let (daemon, mut stream) = setup_daemon().await;
    let params = json!({"filepath": "/tmp/never.py", "content": "x = 1"});

    let missing = rpc_call(
        &mut stream,
        json!({"method": "$/documents/resolve", "params": params}),
        2,
    )
    .await;
    assert_eq!(missing["error"]["code"], INVALID_REQUEST);
    assert_eq!(missing["error"]["message"], "processId not found");

    let malformed = rpc_call(
        &mut stream,
        json!({"method": "$/documents/resolve", "params": params, "processId": "seven"}),
        3,
    )
    .await;
    assert_eq!(malformed["error"]["code"], INVALID_REQUEST);
    assert_eq!(malformed["error"]["message"], "Invalid process ID");

    let unknown = rpc_call(
        &mut stream,
        json!({"method": "$/documents/resolve", "params": params, "processId": 555}),
        4,
    )
    .await;
    assert_eq!(unknown["error"]["code"], INVALID_REQUEST);
    assert_eq!(unknown["error"]["message"], "Process not connected yet.");

    assert!(daemon.vfs.is_empty());
    assert!(daemon.registry.is_empty());

    daemon.stop().await;
}

#[tokio::test]
async fn test_unknown_client_type_rejected() {
    let (daemon, mut stream) = setup_daemon().await;

    let response = handshake(&mut stream, 7, 42).await;

    assert_eq!(response["error"]["code"], INVALID_PARAMS);
    assert_eq!(response["error"]["message"], "Unknown client type");
    assert!(daemon.registry.is_empty());

    daemon.stop().await;
}

#[tokio::test]
async fn test_ping_after_handshake() {
    let (daemon, mut stream) = setup_daemon().await;
    handshake(&mut stream, 9, 1).await;

    let response = rpc_call(&mut stream, json!({"method": "$/ping", "processId": 9}), 2).await;

    assert_eq!(response["result"], "pong!");
    daemon.stop().await;
}

#[tokio::test]
async fn test_unknown_method() {
    let (daemon, mut stream) = setup_daemon().await;

    let response = rpc_call(&mut stream, json!({"method": "$/teleport"}), 5).await;

    assert_eq!(response["id"], 5);
    assert_eq!(response["error"]["code"], METHOD_NOT_FOUND);
    daemon.stop().await;
}

#[tokio::test]
async fn test_malformed_frame_keeps_connection() {
    let (daemon, mut stream) = setup_daemon().await;

    write_frame(&mut stream, b"not json").await;
    let error = read_frame(&mut stream).await;
    assert_eq!(error["error"]["code"], PARSE_ERROR);
    assert!(error["id"].is_null());

    let response = handshake(&mut stream, 12, 0).await;
    assert_eq!(response["result"]["success"], true);

    daemon.stop().await;
}

#[tokio::test]
async fn test_shutdown_notification_unregisters() {
    let (daemon, mut stream) = setup_daemon().await;
    handshake(&mut stream, 21, 0).await;
    assert!(daemon.registry.contains(21));

    let note = json!({"jsonrpc": "2.0", "method": "$/shutdown", "processId": 21});
    write_frame(&mut stream, &serde_json::to_vec(&note).unwrap()).await;

    daemon.wait_for(|r| !r.contains(21)).await;
    daemon.stop().await;
}

#[tokio::test]
async fn test_transport_close_unregisters() {
    let (daemon, mut stream) = setup_daemon().await;
    handshake(&mut stream, 31, 1).await;
    assert!(daemon.registry.contains(31));

    drop(stream);

    daemon.wait_for(|r| r.is_empty()).await;
    daemon.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_handshake_then_immediate_close_leaves_no_entry() {
    let daemon = TestDaemon::start().await.expect("Failed to start daemon");
    let handshake = |pid: u32| {
        serde_json::to_vec(&json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "$/handshake",
            "params": {"processId": pid, "clientType": 1},
        }))
        .unwrap()
    };

    for pid in 0..200 {
        let mut stream = TcpStream::connect(daemon.addr).await.unwrap();
        write_frame(&mut stream, &handshake(1000 + pid)).await;
        drop(stream);
    }

    daemon.wait_for(|r| r.is_empty()).await;
    daemon.stop().await;
}
