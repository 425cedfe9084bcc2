//! Per-room message stream
//!
//! Events are totally ordered by arrival here, not by any client timestamp.
//! Positions start at 1 and never repeat. Only the most recent `capacity`
//! entries are retained; `since` reports when a caller's watermark has
//! fallen out of the retained window.

use std::collections::VecDeque;

use crate::models::{ChatEvent, StreamEntry};

/// Default number of retained chat events per room
pub const DEFAULT_HISTORY_CAPACITY: usize = 500;

/// Events after a watermark
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backlog {
    pub entries: Vec<StreamEntry>,
    /// False when events between the watermark and the first entry were
    /// already evicted
    pub complete: bool,
}

#[derive(Debug, Clone)]
pub struct MessageStream {
    entries: VecDeque<StreamEntry>,
    next_position: u64,
    capacity: usize,
}

impl MessageStream {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            next_position: 1,
            capacity: capacity.max(1),
        }
    }

    /// Append an event, returning its position
    pub fn append(&mut self, event: ChatEvent) -> StreamEntry {
        let position = self.next_position;
        self.next_position += 1;

        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        let entry = StreamEntry { position, event };
        self.entries.push_back(entry.clone());
        entry
    }

    /// Every retained event with position greater than `position`
    pub fn since(&self, position: u64) -> Backlog {
        let entries: Vec<StreamEntry> = self
            .entries
            .iter()
            .filter(|e| e.position > position)
            .cloned()
            .collect();

        let oldest = self.entries.front().map(|e| e.position);
        let complete = match oldest {
            Some(oldest) => oldest <= position.saturating_add(1),
            None => true,
        };

        Backlog { entries, complete }
    }

    /// Position of the most recent event, 0 if none
    pub fn head(&self) -> u64 {
        self.next_position - 1
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MessageStream {
    fn default() -> Self {
        Self::new()
    }
}
