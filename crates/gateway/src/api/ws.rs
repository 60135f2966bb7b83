//! WebSocket pub/sub endpoint for dashboard clients.
//!
//! Protocol:
//! - client → server: `{"action":"subscribe"|"unsubscribe","channels":[...]}`
//!   or `{"action":"ping"}`
//! - server → client: `{"type":"connected|subscribed|unsubscribed|pong|
//!   event|alert|session_update|error","timestamp":...,"data":{...}}`
//!
//! New connections are subscribed to `events` and `alerts` by default.
//! When a dashboard token is configured it must be passed as `?token=`.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;

use al_engine::broadcast::envelope;

use super::auth::token_matches;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum ClientMessage {
    Subscribe {
        #[serde(default)]
        channels: Vec<String>,
    },
    Unsubscribe {
        #[serde(default)]
        channels: Vec<String>,
    },
    Ping,
}

/// GET /api/ws — upgrade to the pub/sub channel.
pub async fn websocket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> Response {
    if let Some(expected) = &state.dashboard_token_hash {
        let provided = query.token.as_deref().unwrap_or("");
        if !token_matches(expected, provided) {
            return (
                axum::http::StatusCode::UNAUTHORIZED,
                axum::Json(serde_json::json!({ "error": "invalid or missing dashboard token" })),
            )
                .into_response();
        }
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state))
        .into_response()
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let broadcaster = state.engine.broadcaster().clone();

    let default_channels = ["events".to_string(), "alerts".to_string()];
    let (subscriber_id, mut broadcast_rx) = broadcaster.subscribe(default_channels.clone());

    // All outbound frames (broadcasts and protocol replies) funnel through
    // one channel so a single writer owns the sink.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Value>();

    let _ = out_tx.send(envelope(
        "connected",
        serde_json::json!({ "channels": default_channels }),
    ));

    let forwarder = tokio::spawn({
        let out_tx = out_tx.clone();
        async move {
            while let Some(message) = broadcast_rx.recv().await {
                if out_tx.send(message).is_err() {
                    break;
                }
            }
        }
    });

    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if ws_sink
                .send(Message::Text(message.to_string()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    while let Some(Ok(message)) = ws_stream.next().await {
        match message {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Subscribe { channels }) => {
                    broadcaster.add_channels(subscriber_id, channels.iter().cloned());
                    let _ = out_tx.send(envelope(
                        "subscribed",
                        serde_json::json!({ "channels": channels }),
                    ));
                }
                Ok(ClientMessage::Unsubscribe { channels }) => {
                    broadcaster
                        .remove_channels(subscriber_id, channels.iter().map(String::as_str));
                    let _ = out_tx.send(envelope(
                        "unsubscribed",
                        serde_json::json!({ "channels": channels }),
                    ));
                }
                Ok(ClientMessage::Ping) => {
                    let _ = out_tx.send(envelope("pong", serde_json::json!({})));
                }
                Err(err) => {
                    let _ = out_tx.send(envelope(
                        "error",
                        serde_json::json!({ "message": format!("invalid message: {err}") }),
                    ));
                }
            },
            Message::Close(_) => break,
            // axum answers WS-level pings automatically.
            _ => {}
        }
    }

    broadcaster.unsubscribe(subscriber_id);
    forwarder.abort();
    writer.abort();
    tracing::debug!(subscriber = subscriber_id, "pub/sub client disconnected");
}
