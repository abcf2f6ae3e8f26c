//! History log — the canonical undo/redo state of the shared canvas.
//!
//! DESIGN
//! ======
//! One log for the whole canvas, not per participant. The log doubles as
//! the undo stack; undone actions move onto a redo stack and back.
//!
//! - Commit appends, empties redo, and evicts the oldest entry once the
//!   log is over its limit (regardless of author).
//! - Undo/redo move exactly one action between the stacks and return
//!   `None` when the source stack is empty.
//! - Clear empties both stacks and cannot be undone.
//!
//! Requests are applied in arrival order with no further serialization, so
//! two near-simultaneous undos from different participants pop two actions.

use std::collections::VecDeque;

use serde::Serialize;

use crate::protocol::StrokeAction;

/// Maximum number of actions retained in the log.
pub const MAX_HISTORY: usize = 100;

/// Read-only copy of the log, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub history: Vec<StrokeAction>,
    pub length: usize,
}

/// Stack depths reported after each change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HistorySize {
    pub history: usize,
    pub redo: usize,
}

#[derive(Debug)]
pub struct HistoryLog {
    history: VecDeque<StrokeAction>,
    redo: Vec<StrokeAction>,
    limit: usize,
}

impl HistoryLog {
    #[must_use]
    pub fn new() -> Self {
        Self { history: VecDeque::with_capacity(MAX_HISTORY + 1), redo: Vec::new(), limit: MAX_HISTORY }
    }

    /// Log bounded to `limit` entries (at least one).
    #[cfg(test)]
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        let limit = limit.max(1);
        Self { history: VecDeque::with_capacity(limit + 1), redo: Vec::new(), limit }
    }

    /// Append a finished stroke. Invalidates any pending redo.
    pub fn commit(&mut self, action: StrokeAction) {
        self.history.push_back(action);
        self.redo.clear();
        if self.history.len() > self.limit {
            self.history.pop_front();
        }
    }

    /// Move the newest action onto the redo stack.
    pub fn undo(&mut self) -> Option<StrokeAction> {
        let action = self.history.pop_back()?;
        self.redo.push(action.clone());
        Some(action)
    }

    /// Move the most recently undone action back onto the log.
    pub fn redo_action(&mut self) -> Option<StrokeAction> {
        let action = self.redo.pop()?;
        self.history.push_back(action.clone());
        Some(action)
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.redo.clear();
    }

    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot { history: self.history.iter().cloned().collect(), length: self.history.len() }
    }

    #[must_use]
    pub fn size(&self) -> HistorySize {
        HistorySize { history: self.history.len(), redo: self.redo.len() }
    }

    #[cfg(test)]
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Redo stack, bottom first.
    #[cfg(test)]
    #[must_use]
    pub fn redo_stack(&self) -> &[StrokeAction] {
        &self.redo
    }
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "history_test.rs"]
mod tests;
