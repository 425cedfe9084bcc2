//! Chat projection keyed by stream position
//!
//! The watermark is the highest position up to which the projection holds
//! every entry the server still has. Anything beyond it is a gap that a
//! `since(watermark)` request repairs.

use std::collections::BTreeMap;

use spinroom_core::{ChatEvent, StreamEntry};
use spinroom_net::ChatBroadcast;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatProjection {
    entries: BTreeMap<u64, ChatEvent>,
    watermark: u64,
}

impl ChatProjection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Position to pass to `since` on reconnect or gap repair
    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    /// True if entries beyond a missing position are held
    pub fn has_gap(&self) -> bool {
        self.entries
            .last_key_value()
            .is_some_and(|(position, _)| *position > self.watermark)
    }

    /// Events in stream order
    pub fn events(&self) -> impl Iterator<Item = &ChatEvent> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Apply a chat broadcast; returns whether the projection changed
    pub fn apply(&mut self, event: &ChatBroadcast) -> bool {
        match event {
            ChatBroadcast::NewMessage { entry } | ChatBroadcast::EmojiReaction { entry } => {
                let changed = self.insert(entry);
                self.advance();
                changed
            }
            ChatBroadcast::Backlog { entries, complete } => {
                let mut changed = false;
                for entry in entries {
                    changed |= self.insert(entry);
                }
                // Entries before the backlog were evicted server-side and
                // can never be repaired
                if !complete {
                    if let Some(first) = entries.first() {
                        let base = first.position.saturating_sub(1);
                        if base > self.watermark {
                            self.watermark = base;
                            changed = true;
                        }
                    }
                }
                let before = self.watermark;
                self.advance();
                changed || self.watermark != before
            }
        }
    }

    fn insert(&mut self, entry: &StreamEntry) -> bool {
        if entry.position <= self.watermark || self.entries.contains_key(&entry.position) {
            return false;
        }
        self.entries.insert(entry.position, entry.event.clone());
        true
    }

    fn advance(&mut self) {
        while self.entries.contains_key(&(self.watermark + 1)) {
            self.watermark += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn entry(position: u64, text: &str) -> StreamEntry {
        StreamEntry {
            position,
            event: ChatEvent::message(Uuid::nil(), Uuid::nil(), "alice".into(), text.into()),
        }
    }

    fn new_message(position: u64) -> ChatBroadcast {
        ChatBroadcast::NewMessage {
            entry: entry(position, &format!("m{}", position)),
        }
    }

    #[test]
    fn test_in_order_advances_watermark() {
        let mut chat = ChatProjection::new();
        for p in 1..=3 {
            assert!(chat.apply(&new_message(p)));
        }
        assert_eq!(chat.watermark(), 3);
        assert!(!chat.has_gap());
    }

    #[test]
    fn test_duplicate_is_noop() {
        let mut chat = ChatProjection::new();
        chat.apply(&new_message(1));
        let once = chat.clone();
        assert!(!chat.apply(&new_message(1)));
        assert_eq!(chat, once);
    }

    #[test]
    fn test_gap_then_backlog_repair() {
        let mut chat = ChatProjection::new();
        chat.apply(&new_message(1));
        chat.apply(&new_message(4));
        assert!(chat.has_gap());
        assert_eq!(chat.watermark(), 1);

        chat.apply(&ChatBroadcast::Backlog {
            entries: vec![entry(2, "m2"), entry(3, "m3"), entry(4, "m4")],
            complete: true,
        });
        assert!(!chat.has_gap());
        assert_eq!(chat.watermark(), 4);
        let texts: Vec<&str> = chat.events().map(|e| e.content.as_str()).collect();
        assert_eq!(texts, vec!["m1", "m2", "m3", "m4"]);
    }

    #[test]
    fn test_incomplete_backlog_skips_evicted_positions() {
        let mut chat = ChatProjection::new();
        chat.apply(&ChatBroadcast::Backlog {
            entries: vec![entry(501, "a"), entry(502, "b")],
            complete: false,
        });
        assert_eq!(chat.watermark(), 502);
        assert!(!chat.has_gap());
    }

    #[test]
    fn test_out_of_order_delivery_converges() {
        let messages: Vec<ChatBroadcast> = (1..=5).map(new_message).collect();
        let mut forward = ChatProjection::new();
        let mut backward = ChatProjection::new();
        for m in &messages {
            forward.apply(m);
        }
        for m in messages.iter().rev() {
            backward.apply(m);
        }
        assert_eq!(forward, backward);
    }
}
