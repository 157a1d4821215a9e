//! Conversation and commitment stores for Switchyard.

pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use std::sync::Arc;
use switchyard_config::AppConfig;
use switchyard_core::error::StoreError;
use switchyard_core::{CommitmentStore, ConversationStore};

/// The two store handles the runtime needs, backed by one database.
#[derive(Clone)]
pub struct Stores {
    pub conversations: Arc<dyn ConversationStore>,
    pub commitments: Arc<dyn CommitmentStore>,
}

impl Stores {
    pub fn from_shared<S>(store: Arc<S>) -> Self
    where
        S: ConversationStore + CommitmentStore + 'static,
    {
        Self {
            conversations: store.clone(),
            commitments: store,
        }
    }
}

/// Open the backend named by `[store]`.
pub async fn open_stores(config: &AppConfig) -> Result<Stores, StoreError> {
    let max_turns = config.store.max_turns;
    match config.store.backend.as_str() {
        "memory" => Ok(Stores::from_shared(Arc::new(InMemoryStore::new(max_turns)))),
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            let path = config.store_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Storage(format!("Failed to create {}: {e}", parent.display()))
                })?;
            }
            let url = format!("sqlite://{}", path.display());
            Ok(Stores::from_shared(Arc::new(SqliteStore::new(&url, max_turns).await?)))
        }
        other => Err(StoreError::Storage(format!("Unsupported store backend '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_core::{ConversationId, Turn};

    #[tokio::test]
    async fn memory_backend_shares_one_store() {
        let mut config = AppConfig::default();
        config.store.backend = "memory".into();
        let stores = open_stores(&config).await.unwrap();
        assert_eq!(stores.conversations.name(), "in_memory");
        let conv = ConversationId::from("c");
        stores.conversations.append_turn(Turn::user(&conv, "hi")).await.unwrap();
        assert!(stores.commitments.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_backend_rejected() {
        let mut config = AppConfig::default();
        config.store.backend = "redis".into();
        assert!(open_stores(&config).await.is_err());
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn sqlite_backend_creates_parent_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.store.path = Some(dir.path().join("nested").join("s.db").display().to_string());
        let stores = open_stores(&config).await.unwrap();
        assert_eq!(stores.conversations.name(), "sqlite");
    }
}
