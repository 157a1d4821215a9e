//! Domain event system: decoupled observation of the engine.
//!
//! Events are published when something interesting happens: a provider
//! fails or recovers, the rate-limit circuit changes phase, a tool runs, a
//! chain ends, a commitment settles. Subscribers filter for what they need.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A provider invocation failed and was recorded
    ProviderFailed {
        provider: String,
        class: String,
        consecutive_failures: u32,
        timestamp: DateTime<Utc>,
    },

    /// A provider answered after having failures on record
    ProviderRecovered {
        provider: String,
        timestamp: DateTime<Utc>,
    },

    /// The primary provider's rate-limit circuit changed phase
    RateLimitChanged {
        provider: String,
        phase: String,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed
    ToolExecuted {
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A chain reached a terminal state
    ChainFinished {
        conversation_id: String,
        reason: String,
        steps: usize,
        timestamp: DateTime<Utc>,
    },

    /// A commitment left the pending state or was escalated
    CommitmentChanged {
        commitment_id: String,
        conversation_id: String,
        status: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
