//! Device WebSocket endpoint
//!
//! Each socket is split into a writer task draining an outbound channel and a
//! reader loop feeding frames to a [`DeviceSession`].

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use super::ApiState;
use crate::devices::DeviceConnection;
use crate::gateway::Gateway;
use crate::session::DeviceSession;

/// Build device WebSocket router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

/// Handle WebSocket upgrade for device connections
async fn ws_upgrade(State(state): State<Arc<ApiState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let gateway = state.gateway.clone();
    ws.on_upgrade(move |socket| handle_device_socket(socket, gateway))
}

/// Drive a connected device socket until it closes
async fn handle_device_socket(socket: WebSocket, gateway: Gateway) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    let mut session = DeviceSession::open(gateway, DeviceConnection::new(&tx));

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => session.handle_text(text.as_str()).await,
            Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                Ok(text) => session.handle_text(text).await,
                Err(e) => tracing::warn!(error = %e, "dropping non-UTF-8 binary frame"),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(device_id = ?session.device_id(), error = %e, "device socket error");
                break;
            }
        }
    }

    let cancelled = session.close().await;
    tracing::debug!(cancelled, "device socket closed");

    // Once the strong sender is gone the writer drains and exits
    drop(tx);
    if let Err(e) = writer.await {
        tracing::warn!(error = %e, "device writer task failed");
    }
}
