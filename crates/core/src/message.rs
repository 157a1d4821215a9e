//! Conversation turn domain types.
//!
//! A conversation is an append-only sequence of turns. The store assigns the
//! sequence number; everything downstream (commitment verification, context
//! windows) orders turns by it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a conversation (session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user (or a scheduled caller speaking on its behalf)
    User,
    /// The assistant's final reply
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// A single turn in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Conversation this turn belongs to
    pub conversation_id: ConversationId,

    /// Position within the conversation, assigned by the store on append
    #[serde(default)]
    pub seq: u64,

    /// Who produced it
    pub role: Role,

    /// The text content
    pub content: String,

    /// Tools executed while producing this turn (assistant turns only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<String>,

    /// When the turn was produced
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    /// Create a new user turn.
    pub fn user(conversation_id: &ConversationId, content: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.clone(),
            seq: 0,
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Create a new assistant turn.
    pub fn assistant(conversation_id: &ConversationId, content: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.clone(),
            seq: 0,
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Attach the names of tools executed while producing this turn.
    pub fn with_tool_calls(mut self, tools: Vec<String>) -> Self {
        self.tool_calls = tools;
        self
    }

    /// Rough token estimate (4 chars ≈ 1 token).
    pub fn estimated_tokens(&self) -> usize {
        self.content.len() / 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_turn() {
        let conv = ConversationId::from("c1");
        let turn = Turn::user(&conv, "Hello, agent!");
        assert_eq!(turn.role, Role::User);
        assert_eq!(turn.content, "Hello, agent!");
        assert_eq!(turn.seq, 0);
        assert!(turn.tool_calls.is_empty());
    }

    #[test]
    fn assistant_turn_records_tools() {
        let conv = ConversationId::from("c1");
        let turn = Turn::assistant(&conv, "done").with_tool_calls(vec!["current_time".into()]);
        assert_eq!(turn.tool_calls, vec!["current_time".to_string()]);
    }

    #[test]
    fn role_parse_roundtrip() {
        for role in [Role::User, Role::Assistant] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("system"), None);
    }

    #[test]
    fn token_estimate() {
        let turn = Turn::user(&ConversationId::new(), "12345678901234567890");
        assert_eq!(turn.estimated_tokens(), 5);
    }
}
