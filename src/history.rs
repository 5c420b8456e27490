//! In-memory conversation history.
//!
//! The history is replayed verbatim on every exchange, so insertion order is
//! part of its meaning.  It grows without bound.

use crate::types::{ConversationTurn, Role};

/// Ordered conversation turns owned by one client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct History {
    turns: Vec<ConversationTurn>,
}

impl History {
    /// Creates an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a turn.  Turns are never deduplicated.
    pub fn append(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    /// Returns an owned copy of every turn, in order.
    pub fn snapshot(&self) -> Vec<ConversationTurn> {
        self.turns.clone()
    }

    /// Removes every turn.
    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Returns the number of turns.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Returns true if there are no turns.
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Returns the most recent turn with the given role.
    pub fn last_of(&self, role: Role) -> Option<&ConversationTurn> {
        self.turns.iter().rev().find(|turn| turn.role == role)
    }
}

impl From<Vec<ConversationTurn>> for History {
    fn from(turns: Vec<ConversationTurn>) -> Self {
        Self { turns }
    }
}
