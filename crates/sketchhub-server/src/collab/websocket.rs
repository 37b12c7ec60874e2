use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use sketchhub_core::{ClientMessage, ConnectionId, DrawingId, Identity, ServerMessage};
use sketchhub_engine::AccessGuard;

use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Deserialize)]
struct WsParams {
    token: String,
}

/// WebSocket handler for live drawing sessions
async fn ws_handler(
    State(state): State<AppState>,
    Path(drawing_id): Path<DrawingId>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let identity = state
        .tokens
        .identity_for(&params.token)
        .await
        .ok_or_else(|| AppError::Unauthorized("invalid or expired token".into()))?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, drawing_id, identity)))
}

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    drawing_id: DrawingId,
    identity: Identity,
) {
    let (mut sender, mut receiver) = socket.split();
    let connection: ConnectionId = Uuid::new_v4();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();

    let handle = match state
        .registry
        .attach(connection, &identity, drawing_id, out_tx.clone())
        .await
    {
        Ok(handle) => handle,
        Err(err) => {
            tracing::warn!(%drawing_id, %identity, %err, "attach refused");
            let frame = ServerMessage::Error {
                message: err.to_string(),
            };
            if let Ok(text) = serde_json::to_string(&frame) {
                let _ = sender.send(Message::Text(text.into())).await;
            }
            return;
        }
    };

    // Forward session frames (welcome first, then broadcasts) to the socket.
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let Ok(text) = serde_json::to_string(&msg) else {
                continue;
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Feed client frames into the session.
    let recv_state = state.clone();
    let recv_identity = identity.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    match serde_json::from_str::<ClientMessage>(text.as_str()) {
                        Ok(ClientMessage::Op { op }) => {
                            // The edit grant is re-checked per operation; the
                            // session trusts its caller on authorization.
                            match recv_state.db.can_edit(&recv_identity, drawing_id).await {
                                Ok(true) => {
                                    if handle.submit_op(connection, op).is_err() {
                                        break;
                                    }
                                }
                                Ok(false) => {
                                    let _ = out_tx.send(ServerMessage::Error {
                                        message: "no edit grant for this drawing".into(),
                                    });
                                }
                                Err(err) => {
                                    tracing::error!(%drawing_id, %err, "edit check failed");
                                }
                            }
                        }
                        Ok(ClientMessage::Checkpoint) => {
                            let _ = handle.checkpoint();
                        }
                        Err(err) => {
                            tracing::warn!(%drawing_id, %connection, %err, "malformed client frame");
                            let _ = out_tx.send(ServerMessage::Error {
                                message: format!("invalid operation: {err}"),
                            });
                        }
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either direction to finish
    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
        }
    }

    // Transport gone, for whatever reason: detach immediately. Operations the
    // session already accepted still complete and broadcast.
    state.registry.detach(connection).await;
    tracing::debug!(%drawing_id, %connection, "websocket closed");
}

pub fn router() -> Router<AppState> {
    Router::new().route("/draw/{drawing_id}", get(ws_handler))
}
