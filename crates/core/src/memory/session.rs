use std::collections::HashMap;

use sqlx::PgPool;
use sqlx::types::Json;
use tokio::sync::RwLock;

use super::conversation::StoredMessage;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("session backend error: {0}")]
    Backend(#[from] sqlx::Error),
    #[error("stored conversation is corrupt: {0}")]
    Corrupt(String),
}

/// Per-speaker persistence for conversation logs.
///
/// A store only moves whole logs in and out; ordering, ids and trimming
/// belong to the message store above it.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// The speaker's log, or empty if the speaker has none yet.
    async fn load(&self, speaker: &str) -> Result<Vec<StoredMessage>, StoreError>;
    async fn save(&self, speaker: &str, messages: &[StoredMessage]) -> Result<(), StoreError>;
    async fn clear(&self, speaker: &str) -> Result<(), StoreError>;
}

/// In-process store. Conversations live as long as the process.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    logs: RwLock<HashMap<String, Vec<StoredMessage>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, speaker: &str) -> Result<Vec<StoredMessage>, StoreError> {
        Ok(self.logs.read().await.get(speaker).cloned().unwrap_or_default())
    }

    async fn save(&self, speaker: &str, messages: &[StoredMessage]) -> Result<(), StoreError> {
        self.logs
            .write()
            .await
            .insert(speaker.to_string(), messages.to_vec());
        Ok(())
    }

    async fn clear(&self, speaker: &str) -> Result<(), StoreError> {
        self.logs.write().await.remove(speaker);
        Ok(())
    }
}

/// Postgres-backed store: one row per speaker in `conversation`, messages as JSONB.
#[derive(Debug, Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SessionStore for PgSessionStore {
    async fn load(&self, speaker: &str) -> Result<Vec<StoredMessage>, StoreError> {
        let row: Option<(Json<serde_json::Value>,)> =
            sqlx::query_as("SELECT messages FROM conversation WHERE speaker = $1")
                .bind(speaker)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((Json(value),)) => serde_json::from_value(value)
                .map_err(|e| StoreError::Corrupt(format!("speaker {speaker}: {e}"))),
            None => Ok(Vec::new()),
        }
    }

    async fn save(&self, speaker: &str, messages: &[StoredMessage]) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO conversation (speaker, messages, updated_at) VALUES ($1, $2, NOW()) \
             ON CONFLICT (speaker) DO UPDATE SET messages = EXCLUDED.messages, updated_at = NOW()",
        )
        .bind(speaker)
        .bind(Json(messages))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear(&self, speaker: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM conversation WHERE speaker = $1")
            .bind(speaker)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_llm::provider::ChatMessage;

    #[tokio::test]
    async fn memory_store_round_trip_and_clear() {
        let store = MemorySessionStore::new();
        assert!(store.load("s1").await.unwrap().is_empty());

        let log = vec![StoredMessage::new(0, ChatMessage::user("hi"))];
        store.save("s1", &log).await.unwrap();
        assert_eq!(store.load("s1").await.unwrap(), log);
        assert!(store.load("s2").await.unwrap().is_empty());

        store.clear("s1").await.unwrap();
        assert!(store.load("s1").await.unwrap().is_empty());
    }
}
