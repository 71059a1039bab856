//! End-to-end WebSocket tests against an in-process agent.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use hostwatch_agent::{router, state::AppState};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn serve(state: AppState) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    let app = router(state);
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("serve");
    });
    addr
}

async fn next_json(ws: &mut WsStream) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("frame within deadline")
            .expect("stream open")
            .expect("frame ok");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("valid json");
        }
    }
}

#[tokio::test]
async fn processes_topic_pushes_sorted_array_on_connect() {
    let addr = serve(AppState::new()).await;
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws/processes"))
        .await
        .expect("connect");

    let first = next_json(&mut ws).await;
    let list = first.as_array().expect("bare array payload");
    assert!(!list.is_empty(), "a live host has processes");
    let cpus: Vec<f64> = list
        .iter()
        .map(|p| p["cpu_percent"].as_f64().unwrap_or(0.0))
        .collect();
    assert!(
        cpus.windows(2).all(|w| w[0] >= w[1]),
        "descending cpu order: {cpus:?}"
    );
    ws.close(None).await.ok();
}

#[tokio::test]
async fn storage_topic_wraps_payload_in_envelope() {
    let addr = serve(AppState::new()).await;
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws/storage"))
        .await
        .expect("connect");
    let first = next_json(&mut ws).await;
    assert_eq!(first["type"], "storage_info");
    assert!(first["data"].is_array());
    ws.close(None).await.ok();
}

#[tokio::test]
async fn unknown_topic_refuses_the_upgrade() {
    let addr = serve(AppState::new()).await;
    assert!(connect_async(format!("ws://{addr}/ws/gpu")).await.is_err());
}

#[tokio::test]
async fn token_gate_rejects_bad_or_missing_tokens() {
    let mut state = AppState::new();
    state.auth_token = Some("sesame".to_string());
    let addr = serve(state).await;

    assert!(connect_async(format!("ws://{addr}/ws/cpu")).await.is_err());
    assert!(connect_async(format!("ws://{addr}/ws/cpu?token=wrong"))
        .await
        .is_err());

    let (mut ws, _) = connect_async(format!("ws://{addr}/ws/cpu?token=sesame"))
        .await
        .expect("correct token accepted");
    let first = next_json(&mut ws).await;
    assert_eq!(first["type"], "cpu_usage");
    ws.close(None).await.ok();
}

#[tokio::test]
async fn malformed_message_gets_error_ack_and_stream_continues() {
    let addr = serve(AppState::new()).await;
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws/services"))
        .await
        .expect("connect");

    ws.send(Message::Text("definitely not json".into()))
        .await
        .expect("send");

    // the error ack is interleaved with periodic array pushes
    let mut saw_error_ack = false;
    let mut saw_snapshot_after = false;
    for _ in 0..10 {
        let frame = next_json(&mut ws).await;
        if frame["status"] == "error" {
            saw_error_ack = true;
        } else if saw_error_ack && frame.is_array() {
            saw_snapshot_after = true;
            break;
        }
    }
    assert!(saw_error_ack, "expected a generic error ack");
    assert!(saw_snapshot_after, "session kept streaming after bad input");
    ws.close(None).await.ok();
}
