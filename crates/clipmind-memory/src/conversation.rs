//! Rolling conversation history

use crate::types::truncate_chars;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Length each message is cut to inside an archive summary
const ARCHIVE_MESSAGE_CHARS: usize = 200;

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// End user
    User,
    /// The agent
    Assistant,
    /// System instructions
    System,
    /// Tool output
    Tool,
}

impl MessageRole {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
            MessageRole::Tool => "tool",
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "system" => Ok(MessageRole::System),
            "tool" => Ok(MessageRole::Tool),
            other => Err(format!("unknown message role: {}", other)),
        }
    }
}

/// One conversation turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// Author
    pub role: MessageRole,
    /// Message text
    pub content: String,
    /// When it was added
    pub timestamp: DateTime<Utc>,
}

impl ConversationMessage {
    /// Create a message
    pub fn new(role: MessageRole, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp,
        }
    }

    /// `role: content` line used in contexts and archives
    pub fn render(&self) -> String {
        format!("{}: {}", self.role.as_str(), self.content)
    }
}

/// Bounded conversation ring
///
/// When a push takes the ring past capacity, the oldest half is drained and
/// handed back to the caller for archiving.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    messages: VecDeque<ConversationMessage>,
    capacity: usize,
}

impl ConversationHistory {
    /// Create an empty history
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(capacity + 1),
            capacity: capacity.max(2),
        }
    }

    /// Append a message; returns the drained oldest half on overflow
    pub fn push(&mut self, message: ConversationMessage) -> Option<Vec<ConversationMessage>> {
        self.messages.push_back(message);
        if self.messages.len() <= self.capacity {
            return None;
        }

        let half = self.capacity / 2;
        Some(self.messages.drain(..half).collect())
    }

    /// Put drained messages back in front of the ring, keeping their order
    pub fn restore(&mut self, drained: Vec<ConversationMessage>) {
        for message in drained.into_iter().rev() {
            self.messages.push_front(message);
        }
    }

    /// Messages, oldest first
    pub fn messages(&self) -> impl DoubleEndedIterator<Item = &ConversationMessage> {
        self.messages.iter()
    }

    /// Number of messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the history is empty
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Ring capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop all messages
    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

/// Compress messages into one archive summary, one truncated line each
pub fn compress_messages(messages: &[ConversationMessage]) -> String {
    messages
        .iter()
        .map(|m| truncate_chars(&m.render(), ARCHIVE_MESSAGE_CHARS))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_drains_oldest_half() {
        let mut history = ConversationHistory::new(4);
        let now = Utc::now();

        for i in 0..4 {
            assert!(history
                .push(ConversationMessage::new(MessageRole::User, format!("m{}", i), now))
                .is_none());
        }

        let archived = history
            .push(ConversationMessage::new(MessageRole::Assistant, "m4", now))
            .unwrap();
        let archived: Vec<_> = archived.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(archived, vec!["m0", "m1"]);

        let remaining: Vec<_> = history.messages().map(|m| m.content.as_str()).collect();
        assert_eq!(remaining, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn test_restore_puts_drained_messages_first() {
        let mut history = ConversationHistory::new(2);
        let now = Utc::now();

        history.push(ConversationMessage::new(MessageRole::User, "m0", now));
        history.push(ConversationMessage::new(MessageRole::User, "m1", now));
        let drained = history
            .push(ConversationMessage::new(MessageRole::User, "m2", now))
            .unwrap();
        history.restore(drained);

        let all: Vec<_> = history.messages().map(|m| m.content.as_str()).collect();
        assert_eq!(all, vec!["m0", "m1", "m2"]);
    }

    #[test]
    fn test_compress_messages() {
        let now = Utc::now();
        let long = "x".repeat(500);
        let summary = compress_messages(&[
            ConversationMessage::new(MessageRole::User, "add an intro", now),
            ConversationMessage::new(MessageRole::Tool, long, now),
        ]);

        let lines: Vec<_> = summary.lines().collect();
        assert_eq!(lines[0], "user: add an intro");
        assert!(lines[1].starts_with("tool: x"));
        assert!(lines[1].ends_with("..."));
        assert_eq!(lines[1].chars().count(), 203);
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("Assistant".parse::<MessageRole>().unwrap(), MessageRole::Assistant);
        assert!("robot".parse::<MessageRole>().is_err());
    }
}
