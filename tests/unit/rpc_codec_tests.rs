//! Unit tests for the stdio JSON-RPC codec, reader, writer, and client.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use serde_json::{json, Value};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;

use agent_relay::acp::codec::{NdjsonCodec, MAX_LINE_BYTES};
use agent_relay::acp::reader::{parse_inbound_line, run_reader, Inbound};
use agent_relay::acp::writer::run_writer;
use agent_relay::acp::{RpcError, StdioClient, INTERNAL_ERROR, INVALID_PARAMS};
use agent_relay::models::permission::{RequestPermissionOutcome, RequestPermissionRequest};
use agent_relay::models::update::{SessionNotification, SessionUpdate, ToolCallUpdate};
use agent_relay::relay::ProtocolClient;
use agent_relay::AppError;

// ── Codec ───────────────────────────────────────────────────────────────────

#[test]
fn partial_frame_is_buffered_until_newline() {
    let mut codec = NdjsonCodec::new();
    let mut buf = BytesMut::from("{\"jsonrpc\":\"2.0\",");

    assert_eq!(codec.decode(&mut buf).expect("partial decode"), None);
    buf.extend_from_slice(b"\"method\":\"x\"}\n");
    assert_eq!(
        codec.decode(&mut buf).expect("complete decode"),
        Some("{\"jsonrpc\":\"2.0\",\"method\":\"x\"}".to_owned())
    );
}

#[test]
fn oversized_frame_is_a_protocol_error() {
    let mut codec = NdjsonCodec::new();
    let mut buf = BytesMut::from(vec![b'x'; MAX_LINE_BYTES + 1].as_slice());
    buf.extend_from_slice(b"\n");

    let err = codec.decode(&mut buf).unwrap_err();
    assert!(matches!(err, AppError::Protocol(ref msg) if msg.contains("line too long")), "{err}");
}

// ── Frame classification ────────────────────────────────────────────────────

#[test]
fn frames_are_classified() {
    let request = parse_inbound_line(r#"{"jsonrpc":"2.0","id":1,"method":"session/new","params":{"cwd":"/w"}}"#)
        .unwrap()
        .unwrap();
    assert!(matches!(request, Inbound::Request { ref method, .. } if method == "session/new"));

    let note = parse_inbound_line(r#"{"jsonrpc":"2.0","method":"session/cancel","params":{"sessionId":"s"}}"#)
        .unwrap()
        .unwrap();
    assert!(matches!(note, Inbound::Notification { ref method, .. } if method == "session/cancel"));

    let ok = parse_inbound_line(r#"{"jsonrpc":"2.0","id":7,"result":{"outcome":{"outcome":"cancelled"}}}"#)
        .unwrap()
        .unwrap();
    assert!(matches!(ok, Inbound::Response { ref id, outcome: Ok(_) } if *id == json!(7)));

    let err = parse_inbound_line(r#"{"jsonrpc":"2.0","id":8,"error":{"code":-32603,"message":"boom"}}"#)
        .unwrap()
        .unwrap();
    assert!(matches!(err, Inbound::Response { outcome: Err(RpcError { code: -32603, .. }), .. }));

    assert!(parse_inbound_line("   ").unwrap().is_none());
    assert!(parse_inbound_line("{oops").is_err());
    assert!(parse_inbound_line(r#"{"jsonrpc":"2.0"}"#).is_err());
}

#[test]
fn usage_errors_map_to_invalid_params() {
    assert_eq!(RpcError::from(AppError::UnknownSession("s".into())).code, INVALID_PARAMS);
    assert_eq!(RpcError::from(AppError::InvalidArgument("cwd".into())).code, INVALID_PARAMS);
    assert_eq!(RpcError::from(AppError::Launch("x".into())).code, INTERNAL_ERROR);
}

#[tokio::test]
async fn reader_forwards_malformed_frames_and_keeps_going() {
    let input: &[u8] = b"not json\n\n{\"jsonrpc\":\"2.0\",\"method\":\"ping\"}\n";
    let (tx, mut rx) = mpsc::channel(8);
    run_reader(input, tx, CancellationToken::new()).await.expect("reader");

    assert!(matches!(rx.recv().await, Some(Inbound::Malformed(_))));
    assert!(matches!(rx.recv().await, Some(Inbound::Notification { method, .. }) if method == "ping"));
    assert!(rx.recv().await.is_none(), "EOF ends the reader");
}

// ── Writer ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn writer_emits_one_line_per_frame_in_order() {
    let (out, mut read_side) = tokio::io::duplex(4096);
    let (tx, rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(run_writer(out, rx, CancellationToken::new()));

    tx.send(json!({"n": 1})).unwrap();
    tx.send(json!({"n": 2})).unwrap();
    drop(tx);
    writer.await.expect("join").expect("writer");

    let mut text = String::new();
    read_side.read_to_string(&mut text).await.expect("read");
    assert_eq!(text, "{\"n\":1}\n{\"n\":2}\n");
}

// ── Client ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn session_update_is_a_notification() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = StdioClient::new(tx);
    client
        .session_update(SessionNotification {
            session_id: "s1".into(),
            update: SessionUpdate::agent_text("hi"),
        })
        .await
        .expect("sent");

    let frame = rx.recv().await.expect("frame");
    assert_eq!(frame["method"], "session/update");
    assert!(frame.get("id").is_none());
    assert_eq!(frame["params"]["sessionId"], "s1");
    assert_eq!(frame["params"]["update"]["sessionUpdate"], "agent_message_chunk");
}

#[tokio::test]
async fn permission_request_correlates_response_by_id() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = Arc::new(StdioClient::new(tx));

    let pending = {
        let client = Arc::clone(&client);
        tokio::spawn(async move {
            client
                .request_permission(RequestPermissionRequest {
                    session_id: "s1".into(),
                    tool_call: ToolCallUpdate::new("c1"),
                    options: Vec::new(),
                })
                .await
        })
    };

    let frame = rx.recv().await.expect("request frame");
    assert_eq!(frame["method"], "session/request_permission");
    let id = frame["id"].clone();
    assert!(!client.complete(&json!(9999), Ok(Value::Null)), "unknown id is not routed");
    assert!(client.complete(&id, Ok(json!({"outcome": {"outcome": "selected", "optionId": "allow_once"}}))));

    let outcome = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .expect("answered")
        .expect("join")
        .expect("outcome");
    assert_eq!(
        outcome,
        RequestPermissionOutcome::Selected {
            option_id: "allow_once".into()
        }
    );
}

#[tokio::test]
async fn disconnect_fails_outstanding_requests() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = Arc::new(StdioClient::new(tx));
    let pending = {
        let client = Arc::clone(&client);
        tokio::spawn(async move {
            client
                .request_permission(RequestPermissionRequest {
                    session_id: "s1".into(),
                    tool_call: ToolCallUpdate::new("c1"),
                    options: Vec::new(),
                })
                .await
        })
    };
    rx.recv().await.expect("request frame");
    client.fail_all();

    let result = pending.await.expect("join");
    assert!(matches!(result, Err(AppError::ChannelClosed(_))), "{result:?}");
}
