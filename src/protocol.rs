//! Protocol — tagged message types for the shared canvas.
//!
//! ARCHITECTURE
//! ============
//! Every WebSocket text frame is one JSON object tagged by `type`. Inbound
//! frames decode into `ClientMessage`, outbound frames are `ServerMessage`.
//! Payloads that do not match a known tag are rejected, never coerced.
//!
//! DESIGN
//! ======
//! - `StrokeAction` is the unit of history: created once by the coordinator
//!   when a gesture completes, then only moved between stacks.
//! - Transient traffic (cursor moves, live previews, ping) shares the same
//!   envelope but never reaches the history log.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// STROKES
// =============================================================================

/// A single 2-D point on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Pen mode for a stroke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    #[serde(alias = "brush", alias = "pen")]
    Draw,
    #[serde(alias = "eraser")]
    Erase,
}

/// One completed pen/eraser gesture. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokeAction {
    pub id: Uuid,
    /// Connection id of the participant who drew it.
    pub author: Uuid,
    /// Milliseconds since Unix epoch.
    pub ts: i64,
    pub points: Vec<Point>,
    pub color: String,
    pub width: f64,
    pub tool: Tool,
}

impl StrokeAction {
    /// Stamp a finished gesture with a fresh id and the current time.
    #[must_use]
    pub fn new(author: Uuid, points: Vec<Point>, color: String, width: f64, tool: Tool) -> Self {
        Self { id: Uuid::new_v4(), author, ts: now_ms(), points, color, width, tool }
    }
}

/// Current time as milliseconds since Unix epoch.
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

// =============================================================================
// ROSTER
// =============================================================================

/// Public view of a connected participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub id: Uuid,
    pub name: String,
    pub color: String,
}

// =============================================================================
// INBOUND
// =============================================================================

/// Messages a client may send. `join`/`leave` are implied by the socket
/// opening and closing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    StrokeCommit { points: Vec<Point>, color: String, width: f64, tool: Tool },
    UndoRequest,
    RedoRequest,
    ClearRequest,
    StateRequest,
    CursorMove { x: f64, y: f64 },
    StrokePreview { points: Vec<Point>, color: String, width: f64, tool: Tool },
    Ping { ts: i64 },
}

impl ClientMessage {
    /// Parse one inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::InvalidMessage` for malformed JSON, unknown
    /// tags, or missing fields.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Wire tag, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StrokeCommit { .. } => "stroke-commit",
            Self::UndoRequest => "undo-request",
            Self::RedoRequest => "redo-request",
            Self::ClearRequest => "clear-request",
            Self::StateRequest => "state-request",
            Self::CursorMove { .. } => "cursor-move",
            Self::StrokePreview { .. } => "stroke-preview",
            Self::Ping { .. } => "ping",
        }
    }

    /// High-frequency traffic that is relayed but never logged.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::CursorMove { .. } | Self::StrokePreview { .. } | Self::Ping { .. })
    }
}

// =============================================================================
// OUTBOUND
// =============================================================================

/// Messages the server pushes to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Sent once to a new connection with its own identity.
    Welcome { id: Uuid, name: String, color: String },
    RosterUpdate { participants: Vec<RosterEntry> },
    /// Entire history log in commit order. Receivers redraw from scratch.
    FullReplay { actions: Vec<StrokeAction> },
    StrokeCommitted { action: StrokeAction },
    HistorySize { history: usize, redo: usize },
    CanvasCleared,
    CursorMoved { id: Uuid, name: String, color: String, x: f64, y: f64 },
    StrokePreview { id: Uuid, points: Vec<Point>, color: String, width: f64, tool: Tool },
    Pong { ts: i64 },
    Error { code: String, message: String },
}

impl ServerMessage {
    /// Build an error message from a typed error.
    pub fn error_from(err: &(impl ErrorCode + ?Sized)) -> Self {
        Self::Error { code: err.error_code().to_string(), message: err.to_string() }
    }

    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::CursorMoved { .. } | Self::StrokePreview { .. } | Self::Pong { .. })
    }

    /// Serialize to a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns the serializer error; only non-finite floats can trigger it.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Grepable error code for structured error messages.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid message: {0}")]
    InvalidMessage(#[from] serde_json::Error),
    #[error("unsupported frame: only JSON text frames are accepted")]
    UnsupportedFrame,
}

impl ErrorCode for ProtocolError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidMessage(_) => "E_INVALID_MESSAGE",
            Self::UnsupportedFrame => "E_UNSUPPORTED_FRAME",
        }
    }
}

#[cfg(test)]
#[path = "protocol_test.rs"]
mod tests;
