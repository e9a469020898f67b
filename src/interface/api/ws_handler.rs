//! Relay WebSocket endpoint
//!
//! `GET /socket?callerId=<id>` upgrades to a WebSocket carrying JSON
//! [`ClientMessage`]/[`ServerMessage`] frames. Each connection gets one writer
//! task draining its ordered outbound queue and one reader task dispatching
//! inbound messages to the relay in arrival order.

use crate::application::SignalingRelay;
use crate::domain::shared::value_objects::UserId;
use crate::domain::signaling::{ClientMessage, ServerMessage};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use metrics::counter;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Connect-time parameters
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketParams {
    pub caller_id: Option<String>,
}

/// WebSocket handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<SocketParams>,
    State(relay): State<Arc<SignalingRelay>>,
) -> Response {
    let user_id = match params.caller_id.map(UserId::parse) {
        Some(Ok(id)) => id,
        Some(Err(e)) => {
            warn!("Rejected socket with invalid callerId: {}", e);
            return (StatusCode::BAD_REQUEST, e).into_response();
        }
        None => {
            warn!("Rejected socket without callerId");
            return (StatusCode::BAD_REQUEST, "callerId is required").into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, relay, user_id))
}

/// Handle one relay connection until either side closes
async fn handle_socket(socket: WebSocket, relay: Arc<SignalingRelay>, user_id: UserId) {
    let (mut sender, mut receiver) = socket.split();
    let (handle, mut outbound) = relay.connect(user_id).await;

    let mut send_task = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            match serde_json::to_string(&message) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        debug!("Failed to write to relay socket");
                        break;
                    }
                }
                Err(e) => error!("Failed to serialize {}: {}", message.name(), e),
            }
        }
    });

    let recv_relay = relay.clone();
    let recv_handle = handle.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(message) => recv_relay.handle(&recv_handle, message).await,
                    Err(e) => {
                        warn!("Malformed message from {}: {}", recv_handle.user_id(), e);
                        counter!("relay_messages_dropped_total", "reason" => "malformed").increment(1);
                        recv_handle.deliver(ServerMessage::error("PARSE_ERROR", e.to_string()));
                    }
                },
                Message::Close(_) => {
                    debug!("Received close from {}", recv_handle.user_id());
                    break;
                }
                Message::Binary(_) => debug!("Ignoring binary frame"),
                // Axum answers pings itself
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    relay.disconnect(&handle).await;
    info!("Relay socket closed for {}", handle.user_id());
}
