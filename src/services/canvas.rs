//! Canvas coordinator — applies requests and decides what to publish.
//!
//! DESIGN
//! ======
//! `Canvas` is the single owned state object for the shared canvas: the
//! session registry, the history log, and one outbound channel per live
//! connection. `AppState` wraps it in one mutex; every request locks once,
//! applies, delivers, and unlocks.
//!
//! `apply` is the pure state transition and returns an `Outcome`. The
//! outcome knows which messages go to whom (`deliveries`); `deliver` pushes
//! them into connection channels. Handlers never send directly.
//!
//! Cursor, preview, and pong traffic may be dropped for a lagging client.
//! Everything else either reaches the client's queue or the client is
//! detached, so no attached client silently misses a state change.
//!
//! Reconciliation is full-state replay: after undo/redo every client gets
//! the whole log and redraws it from scratch. Strokes are never merged.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::protocol::{RosterEntry, ServerMessage, StrokeAction};
use crate::services::history::{HistoryLog, HistorySize, Snapshot};
use crate::services::session::{Participant, SessionRegistry};

// =============================================================================
// REQUESTS
// =============================================================================

/// A state-affecting request, already attributed to a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Join,
    Leave,
    Commit(StrokeAction),
    Undo,
    Redo,
    Clear,
    StateRequest,
}

// =============================================================================
// OUTCOME
// =============================================================================

/// What changed. The dispatch layer turns this into deliveries.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Joined { participant: Participant, roster: Vec<RosterEntry>, snapshot: Snapshot, size: HistorySize },
    RosterChanged(Vec<RosterEntry>),
    Committed { action: StrokeAction, size: HistorySize },
    HistoryChanged { snapshot: Snapshot, size: HistorySize },
    Cleared,
    Snapshot(Snapshot),
    /// Nothing to undo/redo. Nothing is broadcast.
    NoOp,
}

/// Who receives a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    All,
    Only(Uuid),
    AllExcept(Uuid),
}

impl Audience {
    #[must_use]
    pub fn includes(self, client_id: Uuid) -> bool {
        match self {
            Self::All => true,
            Self::Only(id) => id == client_id,
            Self::AllExcept(id) => id != client_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub audience: Audience,
    pub message: ServerMessage,
}

impl Delivery {
    #[must_use]
    pub fn new(audience: Audience, message: ServerMessage) -> Self {
        Self { audience, message }
    }
}

fn history_size(size: HistorySize) -> ServerMessage {
    ServerMessage::HistorySize { history: size.history, redo: size.redo }
}

impl Outcome {
    /// Map an outcome to outbound messages. `origin` is the requesting
    /// connection.
    #[must_use]
    pub fn deliveries(self, origin: Uuid) -> Vec<Delivery> {
        match self {
            Self::Joined { participant, roster, snapshot, size } => vec![
                Delivery::new(
                    Audience::Only(origin),
                    ServerMessage::Welcome { id: participant.id, name: participant.name, color: participant.color },
                ),
                Delivery::new(Audience::All, ServerMessage::RosterUpdate { participants: roster }),
                Delivery::new(Audience::Only(origin), ServerMessage::FullReplay { actions: snapshot.history }),
                Delivery::new(Audience::Only(origin), history_size(size)),
            ],
            Self::RosterChanged(roster) => {
                vec![Delivery::new(Audience::All, ServerMessage::RosterUpdate { participants: roster })]
            }
            Self::Committed { action, size } => vec![
                Delivery::new(Audience::AllExcept(origin), ServerMessage::StrokeCommitted { action }),
                Delivery::new(Audience::All, history_size(size)),
            ],
            Self::HistoryChanged { snapshot, size } => vec![
                Delivery::new(Audience::All, ServerMessage::FullReplay { actions: snapshot.history }),
                Delivery::new(Audience::All, history_size(size)),
            ],
            Self::Cleared => vec![
                Delivery::new(Audience::All, ServerMessage::CanvasCleared),
                Delivery::new(Audience::All, ServerMessage::HistorySize { history: 0, redo: 0 }),
            ],
            Self::Snapshot(snapshot) => {
                vec![Delivery::new(Audience::Only(origin), ServerMessage::FullReplay { actions: snapshot.history })]
            }
            Self::NoOp => Vec::new(),
        }
    }
}

// =============================================================================
// CANVAS
// =============================================================================

pub struct Canvas {
    registry: SessionRegistry,
    history: HistoryLog,
    /// Live connections: `client_id` -> sender for outgoing messages.
    clients: HashMap<Uuid, mpsc::Sender<ServerMessage>>,
}

impl Canvas {
    #[must_use]
    pub fn new() -> Self {
        Self { registry: SessionRegistry::new(), history: HistoryLog::new(), clients: HashMap::new() }
    }

    /// Start routing outbound messages for a connection.
    pub fn attach(&mut self, client_id: Uuid, tx: mpsc::Sender<ServerMessage>) {
        self.clients.insert(client_id, tx);
    }

    /// Stop routing outbound messages for a connection.
    pub fn detach(&mut self, client_id: Uuid) {
        self.clients.remove(&client_id);
    }

    /// Apply one request to the canonical state.
    pub fn apply(&mut self, origin: Uuid, request: Request) -> Outcome {
        match request {
            Request::Join => {
                let participant = self.registry.register(origin);
                info!(client_id = %origin, name = %participant.name, participants = self.registry.count(), "participant joined");
                Outcome::Joined {
                    participant,
                    roster: self.registry.roster(),
                    snapshot: self.history.snapshot(),
                    size: self.history.size(),
                }
            }
            Request::Leave => {
                self.registry.unregister(origin);
                info!(client_id = %origin, participants = self.registry.count(), "participant left");
                Outcome::RosterChanged(self.registry.roster())
            }
            Request::Commit(action) => {
                self.history.commit(action.clone());
                let size = self.history.size();
                info!(client_id = %origin, history = size.history, "stroke committed");
                Outcome::Committed { action, size }
            }
            Request::Undo => match self.history.undo() {
                Some(action) => {
                    info!(client_id = %origin, action_id = %action.id, "undo");
                    self.history_changed()
                }
                None => Outcome::NoOp,
            },
            Request::Redo => match self.history.redo_action() {
                Some(action) => {
                    info!(client_id = %origin, action_id = %action.id, "redo");
                    self.history_changed()
                }
                None => Outcome::NoOp,
            },
            Request::Clear => {
                self.history.clear();
                info!(client_id = %origin, "canvas cleared");
                Outcome::Cleared
            }
            Request::StateRequest => Outcome::Snapshot(self.history.snapshot()),
        }
    }

    fn history_changed(&self) -> Outcome {
        Outcome::HistoryChanged { snapshot: self.history.snapshot(), size: self.history.size() }
    }

    /// Push deliveries into connection channels.
    pub fn deliver(&mut self, deliveries: Vec<Delivery>) {
        for delivery in deliveries {
            self.send(delivery.audience, &delivery.message);
        }
    }

    /// Send one message to every matching connection.
    ///
    /// Transient messages are dropped for a client whose queue is full. Any
    /// other message that cannot be queued detaches that client: its
    /// receiver closes, the connection ends, and a reconnect starts from a
    /// fresh `full-replay`.
    pub fn send(&mut self, audience: Audience, message: &ServerMessage) {
        let mut lagging = Vec::new();
        for (client_id, tx) in &self.clients {
            if !audience.includes(*client_id) {
                continue;
            }
            if tx.try_send(message.clone()).is_err() && !message.is_transient() {
                lagging.push(*client_id);
            }
        }
        for client_id in lagging {
            warn!(%client_id, "outbound queue unavailable; detaching client");
            self.clients.remove(&client_id);
        }
    }

    #[must_use]
    pub fn participant(&self, client_id: Uuid) -> Option<&Participant> {
        self.registry.get(client_id)
    }

    #[must_use]
    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}

impl Default for Canvas {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "canvas_test.rs"]
mod tests;
