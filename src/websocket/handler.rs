use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::connections::{ConnectionManager, OutboundFrame};

/// How long the reader waits for the writer to flush and send Close
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// WebSocket connection state
pub struct WsState {
    pub manager: ConnectionManager,
    /// Capacity of each connection's outbound queue
    pub outbound_buffer: usize,
    /// Cancelled on server shutdown
    pub shutdown: CancellationToken,
}

/// Handle WebSocket upgrade request
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<WsState>>,
) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Drive one connection: a writer task drains the outbound queue into the
/// socket while this task reads inbound frames and hands them to the manager.
async fn handle_socket(socket: WebSocket, state: Arc<WsState>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<OutboundFrame>(state.outbound_buffer);

    // Cancelled on server shutdown and whenever the registry drops this
    // connection, including as a slow client whose writer is stuck mid-send.
    let closed = state.shutdown.child_token();
    let id = state.manager.on_accept(tx, closed.clone());

    // Ends when the registry drops the connection's sender (close, error,
    // slow client, shutdown) or when the socket refuses a write.
    let mut writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(Message::Text(frame.to_string())).await.is_err() {
                return;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    let mut writer_done = false;

    loop {
        select! {
            _ = closed.cancelled() => {
                debug!("Client {} released by the engine", id);
                break;
            }

            _ = &mut writer => {
                writer_done = true;
                break;
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        state.manager.on_message(&id, text.as_bytes());
                    }
                    Some(Ok(Message::Binary(data))) => {
                        state.manager.on_message(&id, &data);
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        state.manager.on_activity(&id);
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Client {} sent close", id);
                        break;
                    }
                    Some(Err(e)) => {
                        state.manager.on_transport_error(&id, &e);
                        break;
                    }
                }
            }
        }
    }

    state.manager.on_close(&id);

    if !writer_done && tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
        writer.abort();
    }

    info!("WebSocket connection {} closed", id);
}
