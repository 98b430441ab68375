//! Admin observer WebSocket (C11): every event-bus publish, fanned out
//! as JSON. Read-only — inbound frames are drained and ignored, there is
//! no back-channel.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use tracing::info;

use super::ServerState;

pub async fn handle_admin_ws(ws: WebSocketUpgrade, State(state): State<ServerState>) -> Response {
    ws.on_upgrade(move |socket| run_admin_session(socket, state))
}

async fn run_admin_session(mut ws: WebSocket, state: ServerState) {
    let mut events = state.core.events.subscribe();
    info!("admin observer connected");

    loop {
        tokio::select! {
            event = events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "admin observer lagged, some events dropped");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };
                let text = serde_json::to_string(&event).unwrap_or_default();
                if ws.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = ws.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => continue,
                }
            }
        }
    }

    info!("admin observer disconnected");
}
