#![allow(clippy::module_name_repetitions)]
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Deserialize, Debug, Clone, Serialize, PartialEq, Eq)]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// A single conversation turn supplied by the caller alongside the query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "User"),
            MessageRole::Assistant => write!(f, "Assistant"),
            MessageRole::System => write!(f, "System"),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.role, self.content)
    }
}

// helper function to format a slice of messages
pub fn format_history(history: &[Message]) -> String {
    history
        .iter()
        .map(|msg| format!("{msg}"))
        .collect::<Vec<String>>()
        .join("\n")
}

/// Conversational state threaded through retrieval and prompt assembly.
///
/// Everything here is ephemeral caller input; nothing is persisted by the
/// retrieval core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationContext {
    #[serde(default)]
    pub history: Vec<Message>,
    /// Topics extracted from recent turns, most recent last.
    #[serde(default)]
    pub recent_topics: Vec<String>,
    pub current_topic: Option<String>,
    /// Section paths that previous answers cited.
    #[serde(default)]
    pub relevant_sections: Vec<String>,
}

impl ConversationContext {
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
            && self.recent_topics.is_empty()
            && self.current_topic.is_none()
            && self.relevant_sections.is_empty()
    }

    pub fn turn_count(&self) -> usize {
        self.history.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_display() {
        let message = Message::user("Hello");
        assert_eq!(format!("{message}"), "User: Hello");
    }

    #[test]
    fn test_format_history() {
        let messages = vec![Message::user("Hello"), Message::assistant("Hi there!")];
        assert_eq!(format_history(&messages), "User: Hello\nAssistant: Hi there!");
    }

    #[test]
    fn test_empty_context() {
        let ctx = ConversationContext::default();
        assert!(ctx.is_empty());
        assert_eq!(ctx.turn_count(), 0);
    }
}
