//! Bounded conversation state.
//!
//! Prior turns are context for later queries, but the prompt budget is
//! finite, so the state is a ring of at most `capacity` turns: appending
//! to a full ring evicts the oldest turn. Appends and resets go through
//! `&mut self`, so callers that share a session across tasks serialize
//! them behind a mutex.

use std::collections::VecDeque;

use crate::models::ConversationTurn;

/// Default number of retained turns.
pub const DEFAULT_WINDOW: usize = 10;

#[derive(Debug, Clone)]
pub struct ConversationState {
    turns: VecDeque<ConversationTurn>,
    capacity: usize,
    total_appended: u64,
}

impl ConversationState {
    /// Create an empty state retaining at most `capacity` turns (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            turns: VecDeque::with_capacity(capacity),
            capacity,
            total_appended: 0,
        }
    }

    /// Append a turn, evicting the oldest one if the window is full.
    pub fn append(&mut self, turn: ConversationTurn) {
        if self.turns.len() == self.capacity {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
        self.total_appended += 1;
    }

    /// The most recent `n` turns, oldest first.
    pub fn recent(&self, n: usize) -> Vec<ConversationTurn> {
        let skip = self.turns.len().saturating_sub(n);
        self.turns.iter().skip(skip).cloned().collect()
    }

    /// Iterate over all retained turns, oldest first.
    pub fn turns(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    /// Clear all turns. Used at session boundaries.
    pub fn reset(&mut self) {
        self.turns.clear();
        self.total_appended = 0;
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Turns appended since the last reset, including evicted ones.
    pub fn total_appended(&self) -> u64 {
        self.total_appended
    }
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}
