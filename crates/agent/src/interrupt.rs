//! Per-conversation interrupt registry.
//!
//! Each conversation has a generation counter. Starting a chain bumps it and
//! hands back a token holding the new generation; any older token for the
//! same conversation now reports itself interrupted. At most one chain per
//! conversation is therefore live at a time.
//!
//! A conversation's entry is dropped when its latest chain finishes, so the
//! map only holds conversations with a chain in flight.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use switchyard_core::ConversationId;
use tracing::debug;

#[derive(Default)]
pub struct InterruptRegistry {
    generations: Mutex<HashMap<ConversationId, Arc<AtomicU64>>>,
}

/// Held by a running chain; checked at every iteration.
#[derive(Debug, Clone)]
pub struct InterruptToken {
    counter: Arc<AtomicU64>,
    generation: u64,
}

impl InterruptToken {
    /// A token nothing can interrupt.
    pub fn detached() -> Self {
        Self {
            counter: Arc::new(AtomicU64::new(0)),
            generation: 0,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.counter.load(Ordering::SeqCst) != self.generation
    }
}

impl InterruptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConversationId, Arc<AtomicU64>>> {
        self.generations.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new chain, interrupting any chain already running for the
    /// conversation.
    pub fn begin(&self, conversation_id: &ConversationId) -> InterruptToken {
        let counter = self
            .lock()
            .entry(conversation_id.clone())
            .or_default()
            .clone();
        let generation = counter.fetch_add(1, Ordering::SeqCst) + 1;
        if generation > 1 {
            debug!(conversation_id = %conversation_id, generation, "Superseding earlier chain");
        }
        InterruptToken {
            counter,
            generation,
        }
    }

    /// Interrupt whatever is running for the conversation without starting
    /// anything new.
    pub fn interrupt(&self, conversation_id: &ConversationId) {
        if let Some(counter) = self.lock().get(conversation_id) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// The chain holding `token` is done. Forgets the conversation if that
    /// chain was still the latest one; a superseded token changes nothing.
    pub fn finish(&self, conversation_id: &ConversationId, token: &InterruptToken) {
        let mut generations = self.lock();
        let latest = generations
            .get(conversation_id)
            .is_some_and(|c| Arc::ptr_eq(c, &token.counter) && !token.is_interrupted());
        if latest {
            generations.remove(conversation_id);
        }
    }

    /// Conversations with a chain in flight.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
