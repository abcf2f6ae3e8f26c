//! Cursor service — ephemeral pointer traffic.
//!
//! DESIGN
//! ======
//! Cursor positions and in-progress stroke previews are relayed to the
//! other participants and immediately forgotten. Nothing here touches the
//! history log. Traffic from connections without a registered participant
//! is dropped.

use uuid::Uuid;

use crate::protocol::{Point, ServerMessage, Tool};
use crate::services::canvas::{Audience, Canvas, Delivery};

/// Relay a cursor position to all peers except the sender.
#[must_use]
pub fn cursor_moved(canvas: &Canvas, from_client_id: Uuid, x: f64, y: f64) -> Option<Delivery> {
    let participant = canvas.participant(from_client_id)?;
    let message = ServerMessage::CursorMoved {
        id: from_client_id,
        name: participant.name.clone(),
        color: participant.color.clone(),
        x,
        y,
    };
    Some(Delivery::new(Audience::AllExcept(from_client_id), message))
}

/// Relay a live, uncommitted stroke to all peers except the sender.
#[must_use]
pub fn stroke_preview(
    canvas: &Canvas,
    from_client_id: Uuid,
    points: Vec<Point>,
    color: String,
    width: f64,
    tool: Tool,
) -> Option<Delivery> {
    canvas.participant(from_client_id)?;
    let message = ServerMessage::StrokePreview { id: from_client_id, points, color, width, tool };
    Some(Delivery::new(Audience::AllExcept(from_client_id), message))
}

/// Echo a latency probe back to the sender.
#[must_use]
pub fn pong(from_client_id: Uuid, ts: i64) -> Delivery {
    Delivery::new(Audience::Only(from_client_id), ServerMessage::Pong { ts })
}

#[cfg(test)]
#[path = "cursor_test.rs"]
mod tests;
