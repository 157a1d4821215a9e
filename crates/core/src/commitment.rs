//! Commitments: promises the assistant made that must be followed through.
//!
//! A commitment starts `Pending` and ends in exactly one terminal state.
//! Terminal states never reopen; [`Commitment::transition`] enforces it so
//! no caller has to.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::StoreError;
use crate::message::ConversationId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitmentStatus {
    Pending,
    Resolved,
    Failed,
    Expired,
}

impl CommitmentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "resolved" => Some(Self::Resolved),
            "failed" => Some(Self::Failed),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

impl std::fmt::Display for CommitmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("commitment {id} is {from}; cannot move to {to}")]
pub struct InvalidTransition {
    pub id: String,
    pub from: CommitmentStatus,
    pub to: CommitmentStatus,
}

/// A promise extracted from assistant output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commitment {
    pub id: String,
    pub conversation_id: ConversationId,
    /// The sentence that made the promise
    pub promise_text: String,
    pub created_at: DateTime<Utc>,
    /// After this point an unfulfilled promise is a failure
    pub deadline: DateTime<Utc>,
    /// Sequence number of the assistant turn that made the promise
    pub turn_seq_at_creation: u64,
    pub status: CommitmentStatus,
    pub verified_tool_call: bool,
    pub verified_response: bool,
    /// Escalation flags raised so far
    pub follow_up_count: u32,
}

impl Commitment {
    pub fn new(
        conversation_id: ConversationId,
        promise_text: impl Into<String>,
        turn_seq_at_creation: u64,
        created_at: DateTime<Utc>,
        deadline_after: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id,
            promise_text: promise_text.into(),
            created_at,
            deadline: created_at + deadline_after,
            turn_seq_at_creation,
            status: CommitmentStatus::Pending,
            verified_tool_call: false,
            verified_response: false,
            follow_up_count: 0,
        }
    }

    /// Move to a terminal state. Fails if already terminal or if `to` is
    /// `Pending`.
    pub fn transition(&mut self, to: CommitmentStatus) -> Result<(), InvalidTransition> {
        if self.status.is_terminal() || !to.is_terminal() {
            return Err(InvalidTransition {
                id: self.id.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }
}

/// Persistence for commitments.
#[async_trait]
pub trait CommitmentStore: Send + Sync {
    async fn insert(&self, commitment: &Commitment) -> Result<(), StoreError>;

    /// Every pending commitment, oldest first.
    async fn pending(&self) -> Result<Vec<Commitment>, StoreError>;

    /// Pending commitments for one conversation, oldest first.
    async fn pending_for(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Commitment>, StoreError>;

    /// Overwrite a stored commitment.
    async fn update(&self, commitment: &Commitment) -> Result<(), StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Commitment>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Commitment {
        Commitment::new(
            ConversationId::from("c1"),
            "I'll check the logs",
            3,
            Utc::now(),
            Duration::minutes(5),
        )
    }

    #[test]
    fn new_commitment_is_pending() {
        let c = sample();
        assert_eq!(c.status, CommitmentStatus::Pending);
        assert_eq!(c.deadline - c.created_at, Duration::minutes(5));
    }

    #[test]
    fn terminal_states_never_reopen() {
        let mut c = sample();
        c.transition(CommitmentStatus::Failed).unwrap();
        assert!(c.transition(CommitmentStatus::Resolved).is_err());
        assert!(c.transition(CommitmentStatus::Pending).is_err());
        assert_eq!(c.status, CommitmentStatus::Failed);
    }

    #[test]
    fn cannot_transition_to_pending() {
        let mut c = sample();
        let err = c.transition(CommitmentStatus::Pending).unwrap_err();
        assert_eq!(err.from, CommitmentStatus::Pending);
    }

    #[test]
    fn status_parse_roundtrip() {
        for s in [
            CommitmentStatus::Pending,
            CommitmentStatus::Resolved,
            CommitmentStatus::Failed,
            CommitmentStatus::Expired,
        ] {
            assert_eq!(CommitmentStatus::parse(s.as_str()), Some(s));
        }
    }
}
