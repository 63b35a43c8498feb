//! Dashboard traffic stream.
//!
//! Consumers connect over a websocket, receive an `init` frame with recent
//! traffic and current stats, then a `traffic` frame per completed request.
//! A `{"type":"ping"}` message is answered with `{"type":"pong"}`.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde_json::json;

use crate::AppState;

pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: Arc<AppState>, socket: WebSocket) {
    let (mut sink, mut source) = socket.split();

    let init = json!({
        "type": "init",
        "traffic": state.traffic.last(100),
        "stats": state.traffic.stats(&state.ledger),
    });
    if sink.send(Message::Text(init.to_string())).await.is_err() {
        return;
    }

    let mut frames = state.broadcaster.subscribe();
    tracing::info!(consumers = state.broadcaster.consumer_count(), "dashboard connected");

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Some(frame) => {
                    if sink.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
                // Evicted by the broadcaster (or shutdown).
                None => break,
            },
            msg = source.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if is_ping(&text) {
                        let pong = json!({ "type": "pong" }).to_string();
                        if sink.send(Message::Text(pong)).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            },
        }
    }

    tracing::info!("dashboard disconnected");
}

fn is_ping(text: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(String::from))
        .as_deref()
        == Some("ping")
}
