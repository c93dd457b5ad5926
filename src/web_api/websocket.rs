//! WebSocket bridge between one socket and its CommandRouter

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::command_router::CommandRouter;
use crate::state::AppState;
use crate::streaming_session::Outbound;

/// Frames queued ahead of a slow client before the loop waits
const OUTBOUND_CAPACITY: usize = 8;
const INBOUND_CAPACITY: usize = 32;

/// WebSocket upgrade handler
pub(super) async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle WebSocket connection
async fn handle_websocket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Register with RealtimeHub
    let (conn_id, mut hub_rx) = state.realtime.register().await;

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(OUTBOUND_CAPACITY);
    let (inbound_tx, inbound_rx) = mpsc::channel::<String>(INBOUND_CAPACITY);

    let router = CommandRouter::new(conn_id, state.router.clone(), outbound_tx);
    let router_task = tokio::spawn(router.run(inbound_rx, Some(state.panel.subscribe())));

    // Single writer: hub broadcasts and session output share the socket
    let mut send_task = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                Some(text) = hub_rx.recv() => Message::Text(text),
                outbound = outbound_rx.recv() => match outbound {
                    Some(Outbound::Text(text)) => Message::Text(text),
                    Some(Outbound::Binary(bytes)) => Message::Binary(bytes),
                    None => break,
                },
            };
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if inbound_tx.send(text).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    tracing::debug!(connection_id = %conn_id, len = data.len(), "Ignoring binary message");
                }
                Some(Ok(Message::Close(_))) | None => {
                    tracing::info!(connection_id = %conn_id, "WebSocket client disconnected");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(connection_id = %conn_id, error = %e, "WebSocket error");
                    break;
                }
            },
            _ = &mut send_task => {
                tracing::info!(connection_id = %conn_id, "WebSocket send failed, closing session");
                break;
            }
        }
    }

    // Router sees the closed channel and runs the full teardown
    drop(inbound_tx);
    if let Err(e) = router_task.await {
        tracing::error!(connection_id = %conn_id, error = %e, "Command router task failed");
    }
    send_task.abort();

    // Unregister from hub
    state.realtime.unregister(&conn_id).await;
}
