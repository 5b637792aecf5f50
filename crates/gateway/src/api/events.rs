//! `GET /api/events`: WebSocket broadcast channel.
//!
//! Client frames:
//! - `{"type":"subscribe","session_id":"..."}`: only that session's events
//! - `{"type":"unsubscribe"}`                 : every session's events again
//! - `{"type":"ping"}`                        : answered with `{"event":"pong"}`
//!
//! Global events (provider health, `events_dropped`) always pass.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::events::Subscription;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Subscribe { session_id: String },
    Unsubscribe,
    Ping,
}

pub async fn events_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Socket handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let subscription = Arc::new(state.events.subscribe());
    tracing::debug!(subscribers = state.events.subscriber_count(), "event subscriber connected");

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(64);

    // Forwarder: bus → outbound channel.
    let forwarder = {
        let subscription = subscription.clone();
        let tx = outbound_tx.clone();
        tokio::spawn(async move {
            loop {
                let event = subscription.next().await;
                let Ok(json) = serde_json::to_string(&event) else {
                    continue;
                };
                if tx.send(json).await.is_err() {
                    break;
                }
            }
        })
    };

    // Writer: outbound channel → socket.
    let writer = tokio::spawn(async move {
        while let Some(text) = outbound_rx.recv().await {
            if ws_sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // Reader loop: client control frames.
    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            Message::Text(text) => handle_frame(&text, &subscription, &outbound_tx).await,
            Message::Close(_) => break,
            _ => {}
        }
    }

    forwarder.abort();
    writer.abort();
    tracing::debug!("event subscriber disconnected");
}

async fn handle_frame(text: &str, subscription: &Subscription, outbound: &mpsc::Sender<String>) {
    match serde_json::from_str::<ClientFrame>(text) {
        Ok(ClientFrame::Subscribe { session_id }) => subscription.set_filter(Some(session_id)),
        Ok(ClientFrame::Unsubscribe) => subscription.set_filter(None),
        Ok(ClientFrame::Ping) => {
            let _ = outbound.send(r#"{"event":"pong"}"#.to_owned()).await;
        }
        Err(e) => tracing::debug!(error = %e, "ignoring unparseable client frame"),
    }
}
