//! Store traits: where conversation turns are persisted.
//!
//! The store owns the transcript. It assigns sequence numbers, keeps each
//! conversation bounded, and hands pruned turns to a [`TurnSummarizer`] in
//! the background.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::message::{ConversationId, Turn};

/// Persistent conversation transcript.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// A human-readable name for this store (e.g., "in_memory", "sqlite").
    fn name(&self) -> &str;

    /// Append a turn and return the sequence number it was assigned.
    async fn append_turn(&self, turn: Turn) -> Result<u64, StoreError>;

    /// The most recent `limit` turns, oldest first.
    async fn read_recent_turns(
        &self,
        conversation_id: &ConversationId,
        limit: usize,
    ) -> Result<Vec<Turn>, StoreError>;

    /// Every turn with a sequence number greater than `seq`, oldest first.
    async fn turns_after(
        &self,
        conversation_id: &ConversationId,
        seq: u64,
    ) -> Result<Vec<Turn>, StoreError>;

    /// Sequence number of the latest turn (0 when empty).
    async fn last_seq(&self, conversation_id: &ConversationId) -> Result<u64, StoreError>;

    /// Forget the conversation's session state (used after degenerate output).
    async fn clear_session_state(&self, conversation_id: &ConversationId)
    -> Result<(), StoreError>;
}

/// Receives turns pruned from a full conversation.
#[async_trait]
pub trait TurnSummarizer: Send + Sync {
    async fn summarize(
        &self,
        conversation_id: &ConversationId,
        pruned: Vec<Turn>,
    ) -> Result<(), StoreError>;
}
