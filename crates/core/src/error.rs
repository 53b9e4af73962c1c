use hearth_llm::provider::LlmError;

use crate::cognition::normalizer::NormalizeError;
use crate::memory::StoreError;

/// Errors that fail a turn. The orchestrator turns every one of these into
/// an apology reply; none escapes `process`.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("cached reply rejected: {0}")]
    CachedPayload(#[from] NormalizeError),
    #[error("model call failed: {0}")]
    Model(#[from] LlmError),
    #[error("conversation store: {0}")]
    Store(#[from] StoreError),
}
