//! WebSocket upgrade and per-connection relay for the broadcast hub
//! (C6), following the teacher's split between a receive loop and a
//! dedicated send task talking over an internal mpsc channel so no two
//! tasks ever touch the same half of the socket.

use crate::models::DisplayRole;
use crate::AppCore;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub role: Option<String>,
}

fn parse_role(role: Option<&str>) -> DisplayRole {
    match role {
        Some("bracket") => DisplayRole::Bracket,
        Some("flyer") => DisplayRole::Flyer,
        _ => DisplayRole::Match,
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, Query(query): Query<WsQuery>, State(core): State<Arc<AppCore>>) -> Response {
    let role = parse_role(query.role.as_deref());
    ws.on_upgrade(move |socket| handle_socket(socket, core, role))
}

async fn handle_socket(socket: WebSocket, core: Arc<AppCore>, role: DisplayRole) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (client_id, mut event_rx) = core.hub.register(role).await;

    info!(client_id = %client_id, role = ?role, "display client connected");

    let send_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let Ok(text) = serde_json::to_string(&event) else { continue };
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = ws_receiver.next().await {
        if let Message::Text(text) = msg {
            handle_client_message(&core, client_id, &text).await;
        }
    }

    info!(client_id = %client_id, "display client disconnecting");
    core.hub.unregister(client_id).await;
    send_task.abort();
}

#[derive(Debug, Deserialize)]
struct AckMessage {
    message_id: u64,
}

/// Clients only ever send one kind of message back: an ack for a
/// delivery-with-ack event. Anything else is ignored, not an error,
/// since display clients are otherwise passive.
async fn handle_client_message(core: &Arc<AppCore>, client_id: Uuid, text: &str) {
    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(text) else { return };
    let Some(event_type) = parsed.get("event").and_then(|v| v.as_str()) else { return };

    if event_type == "ack" {
        if let Ok(ack) = serde_json::from_value::<AckMessage>(parsed) {
            core.hub.ack(ack.message_id, client_id).await;
        }
    }
}

pub async fn admin_ws_handler(ws: WebSocketUpgrade, State(core): State<Arc<AppCore>>) -> Response {
    ws.on_upgrade(move |socket| handle_admin_socket(socket, core))
}

async fn handle_admin_socket(socket: WebSocket, core: Arc<AppCore>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (client_id, mut event_rx) = core.hub.register_admin().await;

    let send_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let Ok(text) = serde_json::to_string(&event) else { continue };
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while ws_receiver.next().await.is_some() {
        // Admin observers don't send anything back; drain the receive
        // half so the connection stays open until the client hangs up.
    }

    core.hub.unregister_admin(client_id).await;
    send_task.abort();
}
