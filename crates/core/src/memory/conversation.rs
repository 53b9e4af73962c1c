use std::sync::Arc;

use hearth_llm::provider::{ChatMessage, Role};
use serde::{Deserialize, Serialize};

use super::session::{SessionStore, StoreError};

/// A conversation message stamped with its position id.
/// The id is persisted alongside the message but never sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: u64,
    #[serde(flatten)]
    pub message: ChatMessage,
}

impl StoredMessage {
    pub fn new(id: u64, message: ChatMessage) -> Self {
        Self { id, message }
    }

    pub fn role(&self) -> Role {
        self.message.role()
    }
}

/// Id for the next message: 0 for an empty log, else last id + 1.
pub fn next_id(log: &[StoredMessage]) -> u64 {
    log.last().map_or(0, |m| m.id + 1)
}

/// Turn-aligned trim.
///
/// While the log is longer than `trigger`, drop the front message if it is a
/// user message, then keep dropping while the front is not a user message.
/// Whole turns go at once, so a trimmed log always starts at a user message.
pub fn trim_turns(log: &mut Vec<StoredMessage>, trigger: usize) {
    let mut dropped = 0usize;
    while log.len() > trigger {
        if log.first().is_some_and(|m| m.role() == Role::User) {
            log.remove(0);
            dropped += 1;
        }
        while log.first().is_some_and(|m| m.role() != Role::User) {
            log.remove(0);
            dropped += 1;
        }
    }
    if dropped > 0 {
        tracing::debug!(dropped, remaining = log.len(), "conversation trimmed");
    }
}

/// Per-speaker ordered message log over an injected [`SessionStore`].
///
/// Every mutation is a read-modify-write of the whole log. Concurrent writers
/// for the same speaker race; the last save wins.
#[derive(Clone)]
pub struct MessageStore {
    sessions: Arc<dyn SessionStore>,
    trigger_limit: usize,
}

impl MessageStore {
    /// `trigger_limit` is at least 1.
    pub fn new(sessions: Arc<dyn SessionStore>, trigger_limit: usize) -> Self {
        Self { sessions, trigger_limit: trigger_limit.max(1) }
    }

    /// The speaker's log, oldest first. Empty for an unknown speaker.
    pub async fn messages(&self, speaker: &str) -> Result<Vec<StoredMessage>, StoreError> {
        self.sessions.load(speaker).await
    }

    /// Stamp, append, trim and save one message. Returns the assigned id.
    pub async fn add(&self, speaker: &str, message: ChatMessage) -> Result<u64, StoreError> {
        let mut log = self.sessions.load(speaker).await?;
        let id = next_id(&log);
        log.push(StoredMessage::new(id, message));
        trim_turns(&mut log, self.trigger_limit);
        self.sessions.save(speaker, &log).await?;
        Ok(id)
    }

    /// Append several messages in order with a single load and save.
    pub async fn add_all(
        &self,
        speaker: &str,
        messages: impl IntoIterator<Item = ChatMessage>,
    ) -> Result<(), StoreError> {
        let mut log = self.sessions.load(speaker).await?;
        for message in messages {
            let id = next_id(&log);
            log.push(StoredMessage::new(id, message));
        }
        trim_turns(&mut log, self.trigger_limit);
        self.sessions.save(speaker, &log).await
    }

    pub async fn reset(&self, speaker: &str) -> Result<(), StoreError> {
        tracing::info!(speaker, "conversation reset");
        self.sessions.clear(speaker).await
    }

    /// History as the model sees it: ids stripped.
    pub async fn model_history(&self, speaker: &str) -> Result<Vec<ChatMessage>, StoreError> {
        Ok(self
            .sessions
            .load(speaker)
            .await?
            .into_iter()
            .map(|m| m.message)
            .collect())
    }
}
