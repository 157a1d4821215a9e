//! SQLite store: conversation turns and commitments that survive restarts.
//!
//! Uses a single SQLite database file with three tables:
//! - `conversations`: per-conversation sequence counter and context floor
//! - `turns`: the bounded transcript, keyed by `(conversation_id, seq)`
//! - `commitments`: promises tracked by the supervisor

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;
use switchyard_core::error::StoreError;
use switchyard_core::{
    Commitment, CommitmentStatus, CommitmentStore, ConversationId, ConversationStore, Role, Turn,
    TurnSummarizer, spawn_background,
};
use tokio::sync::Mutex;
use tracing::{debug, info};

pub struct SqliteStore {
    pool: SqlitePool,
    max_turns: usize,
    summarizer: Option<Arc<dyn TurnSummarizer>>,
    /// Serializes appends so sequence numbers follow call order
    append_lock: Mutex<()>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    ///
    /// The database and all tables/indexes are created automatically.
    pub async fn new(path: &str, max_turns: usize) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self::from_pool(pool, max_turns).await?;
        info!("SQLite store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool.
    pub async fn from_pool(pool: SqlitePool, max_turns: usize) -> Result<Self, StoreError> {
        let store = Self {
            pool,
            max_turns: max_turns.max(1),
            summarizer: None,
            append_lock: Mutex::new(()),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Hand pruned turns to `summarizer` in the background.
    pub fn with_summarizer(mut self, summarizer: Arc<dyn TurnSummarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                conversation_id TEXT PRIMARY KEY,
                last_seq        INTEGER NOT NULL DEFAULT 0,
                context_floor   INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("conversations table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS turns (
                conversation_id TEXT NOT NULL,
                seq             INTEGER NOT NULL,
                role            TEXT NOT NULL,
                content         TEXT NOT NULL,
                tool_calls      TEXT NOT NULL DEFAULT '[]',
                timestamp       TEXT NOT NULL,
                PRIMARY KEY (conversation_id, seq)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("turns table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS commitments (
                id                   TEXT PRIMARY KEY,
                conversation_id      TEXT NOT NULL,
                promise_text         TEXT NOT NULL,
                created_at           TEXT NOT NULL,
                deadline             TEXT NOT NULL,
                turn_seq_at_creation INTEGER NOT NULL,
                status               TEXT NOT NULL,
                verified_tool_call   INTEGER NOT NULL DEFAULT 0,
                verified_response    INTEGER NOT NULL DEFAULT 0,
                follow_up_count      INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("commitments table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_commitments_status ON commitments(status, created_at)")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::MigrationFailed(format!("status index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn parse_time(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    fn row_to_turn(row: &sqlx::sqlite::SqliteRow) -> Result<Turn, StoreError> {
        let conversation_id: String = row
            .try_get("conversation_id")
            .map_err(|e| StoreError::QueryFailed(format!("conversation_id column: {e}")))?;
        let seq: i64 = row
            .try_get("seq")
            .map_err(|e| StoreError::QueryFailed(format!("seq column: {e}")))?;
        let role: String = row
            .try_get("role")
            .map_err(|e| StoreError::QueryFailed(format!("role column: {e}")))?;
        let content: String = row
            .try_get("content")
            .map_err(|e| StoreError::QueryFailed(format!("content column: {e}")))?;
        let tool_calls_json: String = row
            .try_get("tool_calls")
            .map_err(|e| StoreError::QueryFailed(format!("tool_calls column: {e}")))?;
        let timestamp: String = row
            .try_get("timestamp")
            .map_err(|e| StoreError::QueryFailed(format!("timestamp column: {e}")))?;

        let role = Role::parse(&role)
            .ok_or_else(|| StoreError::QueryFailed(format!("unknown role '{role}'")))?;

        Ok(Turn {
            conversation_id: ConversationId(conversation_id),
            seq: seq.max(0) as u64,
            role,
            content,
            tool_calls: serde_json::from_str(&tool_calls_json).unwrap_or_default(),
            timestamp: Self::parse_time(&timestamp),
        })
    }

    fn row_to_commitment(row: &sqlx::sqlite::SqliteRow) -> Result<Commitment, StoreError> {
        let get_text = |col: &str| -> Result<String, StoreError> {
            row.try_get(col)
                .map_err(|e| StoreError::QueryFailed(format!("{col} column: {e}")))
        };
        let get_int = |col: &str| -> Result<i64, StoreError> {
            row.try_get(col)
                .map_err(|e| StoreError::QueryFailed(format!("{col} column: {e}")))
        };

        let status = get_text("status")?;
        let status = CommitmentStatus::parse(&status)
            .ok_or_else(|| StoreError::QueryFailed(format!("unknown status '{status}'")))?;

        Ok(Commitment {
            id: get_text("id")?,
            conversation_id: ConversationId(get_text("conversation_id")?),
            promise_text: get_text("promise_text")?,
            created_at: Self::parse_time(&get_text("created_at")?),
            deadline: Self::parse_time(&get_text("deadline")?),
            turn_seq_at_creation: get_int("turn_seq_at_creation")?.max(0) as u64,
            status,
            verified_tool_call: get_int("verified_tool_call")? != 0,
            verified_response: get_int("verified_response")? != 0,
            follow_up_count: get_int("follow_up_count")?.max(0) as u32,
        })
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

#[async_trait]
impl ConversationStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn append_turn(&self, turn: Turn) -> Result<u64, StoreError> {
        let _guard = self.append_lock.lock().await;
        let conversation_id = turn.conversation_id.clone();
        let tool_calls_json = serde_json::to_string(&turn.tool_calls)
            .map_err(|e| StoreError::Storage(format!("tool_calls serialization: {e}")))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("BEGIN failed: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO conversations (conversation_id, last_seq) VALUES (?1, 1)
            ON CONFLICT(conversation_id) DO UPDATE SET last_seq = last_seq + 1
            "#,
        )
        .bind(conversation_id.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Storage(format!("sequence bump failed: {e}")))?;

        let seq: i64 = sqlx::query("SELECT last_seq FROM conversations WHERE conversation_id = ?1")
            .bind(conversation_id.as_str())
            .fetch_one(&mut *tx)
            .await
            .and_then(|row| row.try_get("last_seq"))
            .map_err(|e| StoreError::QueryFailed(format!("last_seq: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO turns (conversation_id, seq, role, content, tool_calls, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(conversation_id.as_str())
        .bind(seq)
        .bind(turn.role.as_str())
        .bind(&turn.content)
        .bind(&tool_calls_json)
        .bind(turn.timestamp.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT turn failed: {e}")))?;

        let cutoff = seq - self.max_turns as i64;
        let pruned_rows = sqlx::query(
            "SELECT * FROM turns WHERE conversation_id = ?1 AND seq <= ?2 ORDER BY seq ASC",
        )
        .bind(conversation_id.as_str())
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("prune scan: {e}")))?;

        if !pruned_rows.is_empty() {
            sqlx::query("DELETE FROM turns WHERE conversation_id = ?1 AND seq <= ?2")
                .bind(conversation_id.as_str())
                .bind(cutoff)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Storage(format!("prune failed: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("COMMIT failed: {e}")))?;

        let pruned = pruned_rows
            .iter()
            .map(Self::row_to_turn)
            .collect::<Result<Vec<_>, _>>()?;
        self.dispatch_pruned(&conversation_id, pruned);

        Ok(seq.max(0) as u64)
    }

    async fn read_recent_turns(
        &self,
        conversation_id: &ConversationId,
        limit: usize,
    ) -> Result<Vec<Turn>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT t.* FROM turns t
            LEFT JOIN conversations c ON c.conversation_id = t.conversation_id
            WHERE t.conversation_id = ?1 AND t.seq > COALESCE(c.context_floor, 0)
            ORDER BY t.seq DESC
            LIMIT ?2
            "#,
        )
        .bind(conversation_id.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("recent turns: {e}")))?;

        let mut turns = rows
            .iter()
            .map(Self::row_to_turn)
            .collect::<Result<Vec<_>, _>>()?;
        turns.reverse();
        Ok(turns)
    }

    async fn turns_after(
        &self,
        conversation_id: &ConversationId,
        seq: u64,
    ) -> Result<Vec<Turn>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM turns WHERE conversation_id = ?1 AND seq > ?2 ORDER BY seq ASC",
        )
        .bind(conversation_id.as_str())
        .bind(seq as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("turns after {seq}: {e}")))?;

        rows.iter().map(Self::row_to_turn).collect()
    }

    async fn last_seq(&self, conversation_id: &ConversationId) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT last_seq FROM conversations WHERE conversation_id = ?1")
            .bind(conversation_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("last_seq: {e}")))?;

        match row {
            Some(r) => {
                let seq: i64 = r
                    .try_get("last_seq")
                    .map_err(|e| StoreError::QueryFailed(format!("last_seq column: {e}")))?;
                Ok(seq.max(0) as u64)
            }
            None => Ok(0),
        }
    }

    async fn clear_session_state(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE conversations SET context_floor = last_seq WHERE conversation_id = ?1")
            .bind(conversation_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("clear session failed: {e}")))?;
        debug!(conversation_id = %conversation_id, "Session state cleared");
        Ok(())
    }
}

#[async_trait]
impl CommitmentStore for SqliteStore {
    async fn insert(&self, commitment: &Commitment) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO commitments (id, conversation_id, promise_text, created_at, deadline,
                turn_seq_at_creation, status, verified_tool_call, verified_response, follow_up_count)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&commitment.id)
        .bind(commitment.conversation_id.as_str())
        .bind(&commitment.promise_text)
        .bind(commitment.created_at.to_rfc3339())
        .bind(commitment.deadline.to_rfc3339())
        .bind(commitment.turn_seq_at_creation as i64)
        .bind(commitment.status.as_str())
        .bind(commitment.verified_tool_call as i64)
        .bind(commitment.verified_response as i64)
        .bind(commitment.follow_up_count as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT commitment failed: {e}")))?;

        debug!(commitment_id = %commitment.id, "Stored commitment");
        Ok(())
    }

    async fn pending(&self) -> Result<Vec<Commitment>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM commitments WHERE status = 'pending' ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("pending commitments: {e}")))?;

        rows.iter().map(Self::row_to_commitment).collect()
    }

    async fn pending_for(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Commitment>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM commitments
            WHERE status = 'pending' AND conversation_id = ?1
            ORDER BY created_at ASC
            "#,
        )
        .bind(conversation_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("pending commitments: {e}")))?;

        rows.iter().map(Self::row_to_commitment).collect()
    }

    async fn update(&self, commitment: &Commitment) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE commitments SET
                status = ?2,
                verified_tool_call = ?3,
                verified_response = ?4,
                follow_up_count = ?5
            WHERE id = ?1
            "#,
        )
        .bind(&commitment.id)
        .bind(commitment.status.as_str())
        .bind(commitment.verified_tool_call as i64)
        .bind(commitment.verified_response as i64)
        .bind(commitment.follow_up_count as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("UPDATE commitment failed: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(commitment.id.clone()));
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Commitment>, StoreError> {
        let row = sqlx::query("SELECT * FROM commitments WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("GET commitment: {e}")))?;

        match row {
            Some(ref r) => Ok(Some(Self::row_to_commitment(r)?)),
            None => Ok(None),
        }
    }
}
