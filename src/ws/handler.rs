use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::AppState;
use crate::ws::manager::Relay;

pub const TASK_UPDATE_EVENT: &str = "task:update";
pub const TASK_UPDATED_EVENT: &str = "task:updated";

/// Wire frame for the relay channel.
#[derive(Debug, Serialize, Deserialize)]
pub struct RelayFrame {
    pub event: String,
    pub data: serde_json::Value,
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.relay))
}

/// Manage one connection after upgrade: register with the relay, spawn a
/// sender task for outbound frames, relay inbound `task:update` frames to
/// everyone else, clean up on disconnect.
async fn handle_socket(socket: WebSocket, relay: Arc<Relay>) {
    let conn_id = Uuid::new_v4();
    tracing::info!(conn_id = %conn_id, "websocket connected");

    let mut rx = relay.add(conn_id).await;
    let (mut sink, mut stream) = socket.split();

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                tracing::debug!(conn_id = %conn_id, "websocket sink closed");
                break;
            }
        }
    });

    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if let Some(outbound) = relay_frame(&text) {
                    relay
                        .broadcast_except(conn_id, Message::Text(outbound))
                        .await;
                } else {
                    tracing::debug!(conn_id = %conn_id, "ignoring unrecognized frame");
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "websocket receive error");
                break;
            }
        }
    }

    relay.remove(conn_id).await;
    send_task.abort();
    tracing::info!(conn_id = %conn_id, "websocket disconnected");
}

/// Turn an inbound `task:update` frame into the outbound `task:updated`
/// frame, passing the payload through verbatim. Returns `None` for
/// malformed or unknown frames; the relay never persists or validates.
fn relay_frame(text: &str) -> Option<String> {
    let frame: RelayFrame = serde_json::from_str(text).ok()?;
    if frame.event != TASK_UPDATE_EVENT {
        return None;
    }
    let outbound = RelayFrame {
        event: TASK_UPDATED_EVENT.to_string(),
        data: frame.data,
    };
    serde_json::to_string(&outbound).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn task_update_becomes_task_updated_with_payload_intact() {
        let inbound = json!({
            "event": "task:update",
            "data": { "id": "abc", "status": "done", "title": "Ship release" }
        })
        .to_string();

        let outbound = relay_frame(&inbound).expect("frame should relay");
        let parsed: RelayFrame = serde_json::from_str(&outbound).unwrap();
        assert_eq!(parsed.event, "task:updated");
        assert_eq!(parsed.data["status"], "done");
        assert_eq!(parsed.data["title"], "Ship release");
    }

    #[test]
    fn unknown_events_are_dropped() {
        let inbound = json!({ "event": "user:typing", "data": {} }).to_string();
        assert!(relay_frame(&inbound).is_none());
    }

    #[test]
    fn malformed_frames_are_dropped() {
        assert!(relay_frame("not json").is_none());
        assert!(relay_frame("{\"data\": {}}").is_none());
    }
}
