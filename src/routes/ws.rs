//! WebSocket handler — bidirectional message relay.
//!
//! DESIGN
//! ======
//! On upgrade, generates a client ID, joins the canvas, and enters a
//! `select!` loop:
//! - Incoming client messages → decode + dispatch under the canvas lock
//! - Messages queued for this client by any request → forward to socket
//!
//! Dispatch is pure business logic: it applies the request and returns
//! deliveries. Delivery happens while the lock is still held, so every
//! client sees broadcasts in the order the transitions were applied.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → attach channel, `join` (welcome, roster, replay, size)
//! 2. Client sends messages → dispatch → deliveries
//! 3. Close, failed write, or detach by the canvas → `leave` → roster broadcast

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::{Sink, SinkExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::{ClientMessage, ProtocolError, ServerMessage, StrokeAction};
use crate::services::canvas::{Canvas, Delivery, Request};
use crate::services::cursor;
use crate::state::AppState;

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let client_id = Uuid::new_v4();

    // Per-connection channel for everything addressed to this client.
    let (client_tx, mut client_rx) = mpsc::channel::<ServerMessage>(state.config.client_channel_capacity);
    connect(&state, client_id, client_tx).await;

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                let replies = match msg {
                    Message::Text(text) => process_inbound_text(&state, client_id, text.as_str()).await,
                    Message::Binary(_) => {
                        warn!(%client_id, "ws: binary frame rejected");
                        vec![ServerMessage::error_from(&ProtocolError::UnsupportedFrame)]
                    }
                    Message::Close(_) => break,
                    _ => Vec::new(),
                };
                if send_replies(&mut socket, &replies).await.is_err() {
                    break;
                }
            }
            message = client_rx.recv() => {
                // `None` means the canvas detached this client.
                let Some(message) = message else { break };
                if send_message(&mut socket, &message).await.is_err() {
                    break;
                }
            }
        }
    }

    disconnect(&state, client_id).await;
    info!(%client_id, "ws: client disconnected");
}

/// Attach the outbound channel and register the participant.
pub(crate) async fn connect(state: &AppState, client_id: Uuid, tx: mpsc::Sender<ServerMessage>) {
    let mut canvas = state.canvas.lock().await;
    canvas.attach(client_id, tx);
    let outcome = canvas.apply(client_id, Request::Join);
    canvas.deliver(outcome.deliveries(client_id));
    info!(%client_id, clients = canvas.client_count(), history = canvas.history().size().history, "ws: client connected");
}

/// Detach the outbound channel and tell the others.
pub(crate) async fn disconnect(state: &AppState, client_id: Uuid) {
    let mut canvas = state.canvas.lock().await;
    canvas.detach(client_id);
    let outcome = canvas.apply(client_id, Request::Leave);
    canvas.deliver(outcome.deliveries(client_id));
}

// =============================================================================
// DISPATCH
// =============================================================================

/// Decode and apply one inbound text frame. Returns messages for the
/// sender that bypass the canvas (decode errors); everything else is
/// delivered through the client channels.
pub(crate) async fn process_inbound_text(state: &AppState, client_id: Uuid, text: &str) -> Vec<ServerMessage> {
    let msg = match ClientMessage::decode(text) {
        Ok(m) => m,
        Err(e) => {
            warn!(%client_id, error = %e, "ws: invalid inbound message");
            return vec![ServerMessage::error_from(&e)];
        }
    };

    if !msg.is_transient() {
        info!(%client_id, kind = msg.kind(), "ws: recv message");
    }

    let mut canvas = state.canvas.lock().await;
    let deliveries = dispatch(&mut canvas, client_id, msg);
    canvas.deliver(deliveries);
    Vec::new()
}

fn dispatch(canvas: &mut Canvas, client_id: Uuid, msg: ClientMessage) -> Vec<Delivery> {
    let request = match msg {
        ClientMessage::StrokeCommit { points, color, width, tool } => {
            Request::Commit(StrokeAction::new(client_id, points, color, width, tool))
        }
        ClientMessage::UndoRequest => Request::Undo,
        ClientMessage::RedoRequest => Request::Redo,
        ClientMessage::ClearRequest => Request::Clear,
        ClientMessage::StateRequest => Request::StateRequest,
        ClientMessage::CursorMove { x, y } => {
            return cursor::cursor_moved(canvas, client_id, x, y).into_iter().collect();
        }
        ClientMessage::StrokePreview { points, color, width, tool } => {
            return cursor::stroke_preview(canvas, client_id, points, color, width, tool)
                .into_iter()
                .collect();
        }
        ClientMessage::Ping { ts } => return vec![cursor::pong(client_id, ts)],
    };
    canvas.apply(client_id, request).deliveries(client_id)
}

// =============================================================================
// HELPERS
// =============================================================================

/// Write replies in order, stopping at the first failed write.
async fn send_replies<S>(socket: &mut S, replies: &[ServerMessage]) -> Result<(), ()>
where
    S: Sink<Message> + Unpin,
{
    for reply in replies {
        send_message(socket, reply).await?;
    }
    Ok(())
}

async fn send_message<S>(socket: &mut S, message: &ServerMessage) -> Result<(), ()>
where
    S: Sink<Message> + Unpin,
{
    let json = match message.encode() {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize message");
            return Err(());
        }
    };
    if !message.is_transient() {
        debug!(bytes = json.len(), "ws: send message");
    }
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
