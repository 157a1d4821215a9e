//! In-memory store: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use switchyard_core::error::StoreError;
use switchyard_core::{
    Commitment, CommitmentStore, ConversationId, ConversationStore, Turn, TurnSummarizer,
    spawn_background,
};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct ConversationLog {
    turns: VecDeque<Turn>,
    last_seq: u64,
    /// Turns at or below this seq are excluded from context reads
    context_floor: u64,
}

/// Conversation and commitment store held entirely in process memory.
pub struct InMemoryStore {
    conversations: RwLock<HashMap<ConversationId, ConversationLog>>,
    commitments: RwLock<Vec<Commitment>>,
    max_turns: usize,
    summarizer: Option<Arc<dyn TurnSummarizer>>,
}

impl InMemoryStore {
    pub fn new(max_turns: usize) -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            commitments: RwLock::new(Vec::new()),
            max_turns: max_turns.max(1),
            summarizer: None,
        }
    }

    /// Hand pruned turns to `summarizer` in the background.
    pub fn with_summarizer(mut self, summarizer: Arc<dyn TurnSummarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    fn dispatch_pruned(&self, conversation_id: &ConversationId, pruned: Vec<Turn>) {
        if pruned.is_empty() {
            return;
        }
        debug!(conversation_id = %conversation_id, pruned = pruned.len(), "Pruned old turns");
        if let Some(summarizer) = &self.summarizer {
            let summarizer = summarizer.clone();
            let conversation_id = conversation_id.clone();
            spawn_background("summarize_pruned_turns", async move {
                summarizer.summarize(&conversation_id, pruned).await
            });
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(50)
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn append_turn(&self, mut turn: Turn) -> Result<u64, StoreError> {
        let conversation_id = turn.conversation_id.clone();
        let (seq, pruned) = {
            let mut conversations = self.conversations.write().await;
            let log = conversations.entry(conversation_id.clone()).or_default();
            log.last_seq += 1;
            turn.seq = log.last_seq;
            log.turns.push_back(turn);

            let excess = log.turns.len().saturating_sub(self.max_turns);
            let pruned: Vec<Turn> = log.turns.drain(..excess).collect();
            (log.last_seq, pruned)
        };
        self.dispatch_pruned(&conversation_id, pruned);
        Ok(seq)
    }

    async fn read_recent_turns(
        &self,
        conversation_id: &ConversationId,
        limit: usize,
    ) -> Result<Vec<Turn>, StoreError> {
        let conversations = self.conversations.read().await;
        let Some(log) = conversations.get(conversation_id) else {
            return Ok(Vec::new());
        };
        let visible: Vec<&Turn> = log
            .turns
            .iter()
            .filter(|t| t.seq > log.context_floor)
            .collect();
        let skip = visible.len().saturating_sub(limit);
        Ok(visible.into_iter().skip(skip).cloned().collect())
    }

    async fn turns_after(
        &self,
        conversation_id: &ConversationId,
        seq: u64,
    ) -> Result<Vec<Turn>, StoreError> {
        let conversations = self.conversations.read().await;
        Ok(conversations
            .get(conversation_id)
            .map(|log| log.turns.iter().filter(|t| t.seq > seq).cloned().collect())
            .unwrap_or_default())
    }

    async fn last_seq(&self, conversation_id: &ConversationId) -> Result<u64, StoreError> {
        let conversations = self.conversations.read().await;
        Ok(conversations
            .get(conversation_id)
            .map(|log| log.last_seq)
            .unwrap_or(0))
    }

    async fn clear_session_state(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<(), StoreError> {
        let mut conversations = self.conversations.write().await;
        if let Some(log) = conversations.get_mut(conversation_id) {
            log.context_floor = log.last_seq;
            debug!(conversation_id = %conversation_id, floor = log.context_floor, "Session state cleared");
        }
        Ok(())
    }
}

#[async_trait]
impl CommitmentStore for InMemoryStore {
    async fn insert(&self, commitment: &Commitment) -> Result<(), StoreError> {
        let mut commitments = self.commitments.write().await;
        if commitments.iter().any(|c| c.id == commitment.id) {
            return Err(StoreError::Storage(format!(
                "commitment {} already exists",
                commitment.id
            )));
        }
        commitments.push(commitment.clone());
        Ok(())
    }

    async fn pending(&self) -> Result<Vec<Commitment>, StoreError> {
        let commitments = self.commitments.read().await;
        let mut pending: Vec<Commitment> = commitments
            .iter()
            .filter(|c| !c.status.is_terminal())
            .cloned()
            .collect();
        pending.sort_by_key(|c| c.created_at);
        Ok(pending)
    }

    async fn pending_for(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Commitment>, StoreError> {
        Ok(self
            .pending()
            .await?
            .into_iter()
            .filter(|c| &c.conversation_id == conversation_id)
            .collect())
    }

    async fn update(&self, commitment: &Commitment) -> Result<(), StoreError> {
        let mut commitments = self.commitments.write().await;
        let slot = commitments
            .iter_mut()
            .find(|c| c.id == commitment.id)
            .ok_or_else(|| StoreError::NotFound(commitment.id.clone()))?;
        *slot = commitment.clone();
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Commitment>, StoreError> {
        let commitments = self.commitments.read().await;
        Ok(commitments.iter().find(|c| c.id == id).cloned())
    }
}
