//! WebSocket upgrade and the socket↔session pump. One route serves every
//! topic; the path segment names the stream.

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;

use crate::session::Session;
use crate::state::AppState;
use crate::topic::Topic;

const OUTBOUND_BUFFER: usize = 64;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(topic): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    let Ok(topic) = topic.parse::<Topic>() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if let Some(expected) = state.auth_token.as_ref() {
        match query.get("token") {
            Some(token) if token == expected => {}
            _ => return StatusCode::UNAUTHORIZED.into_response(),
        }
    }
    // the web layer authenticates; it forwards the principal for the audit trail
    let actor = query
        .get("actor")
        .cloned()
        .unwrap_or_else(|| "unknown".to_string());
    ws.on_upgrade(move |socket| handle_socket(socket, state, topic, peer, actor))
}

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    topic: Topic,
    peer: SocketAddr,
    actor: String,
) {
    let (mut sink, mut stream) = socket.split();

    // single writer task drains the session's FIFO, preserving send order
    let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    let mut session = Session::new(topic, state, peer.to_string(), actor, tx);
    session.activate().await;

    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(text) => session.handle_message(&text).await,
            Message::Close(_) => break,
            _ => {}
        }
    }

    debug!(topic = topic.as_str(), %peer, "socket closed");
    session.shutdown().await;
    // all senders are gone once the session is dropped; the writer drains
    // anything already queued and exits
    drop(session);
    let _ = writer.await;
}
