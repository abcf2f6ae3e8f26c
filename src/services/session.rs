//! Session registry — connection ids to display identities.
//!
//! DESIGN
//! ======
//! Each live connection gets a name ("User N") and a color. Names come
//! from a process-wide counter that never rewinds, so they stay unique for
//! the life of the process. Colors come from a fixed palette; a color is in
//! use exactly while some live participant holds it, so unregistering frees
//! it implicitly.
//!
//! TRADE-OFFS
//! ==========
//! Once the palette is exhausted a random RGB color is synthesized. It may
//! collide with a live participant's color; registration still succeeds.

use rand::Rng;
use tracing::warn;
use uuid::Uuid;

use crate::protocol::RosterEntry;

/// Presence colors handed out in order while available.
pub const PALETTE: [&str; 12] = [
    "#E53935", "#1E88E5", "#43A047", "#FB8C00", "#8E24AA", "#00ACC1", "#F4511E", "#3949AB", "#7CB342", "#D81B60",
    "#6D4C41", "#546E7A",
];

/// A connected participant. Owned by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: Uuid,
    pub name: String,
    pub color: String,
}

impl Participant {
    #[must_use]
    pub fn to_entry(&self) -> RosterEntry {
        RosterEntry { id: self.id, name: self.name.clone(), color: self.color.clone() }
    }
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    /// Live participants in registration order.
    participants: Vec<Participant>,
    /// Last numeric suffix handed out. Never reset.
    name_counter: u64,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a display identity to a new connection.
    ///
    /// A repeated call for an already-live id returns the existing
    /// participant unchanged.
    pub fn register(&mut self, connection_id: Uuid) -> Participant {
        if let Some(existing) = self.get(connection_id) {
            warn!(%connection_id, "register called twice for live connection");
            return existing.clone();
        }

        self.name_counter += 1;
        let participant =
            Participant { id: connection_id, name: format!("User {}", self.name_counter), color: self.pick_color() };
        self.participants.push(participant.clone());
        participant
    }

    /// Remove a participant and free its color. Unknown ids are ignored.
    pub fn unregister(&mut self, connection_id: Uuid) {
        self.participants.retain(|p| p.id != connection_id);
    }

    /// Snapshot of all live participants, in registration order.
    #[must_use]
    pub fn roster(&self) -> Vec<RosterEntry> {
        self.participants.iter().map(Participant::to_entry).collect()
    }

    #[must_use]
    pub fn get(&self, connection_id: Uuid) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == connection_id)
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.participants.len()
    }

    fn pick_color(&self) -> String {
        let free = PALETTE
            .iter()
            .find(|color| !self.participants.iter().any(|p| p.color == **color));
        match free {
            Some(color) => (*color).to_string(),
            None => random_color(),
        }
    }
}

/// Fallback color once the palette is used up.
fn random_color() -> String {
    let rgb: u32 = rand::rng().random_range(0..=0x00FF_FFFF);
    format!("#{rgb:06X}")
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
