use hearth_llm::provider::{ChatMessage, CompletionRequest, LlmError, LlmProvider};

use super::prompt::tool_definition;
use crate::config::HearthCfg;
use crate::error::TurnError;
use crate::types::ErrorCode;

/// Ask the model for the next assistant message, offering the home tool.
/// Bare text comes back as assistant content.
pub async fn generate<P: LlmProvider + ?Sized>(
    provider: &P,
    messages: Vec<ChatMessage>,
    cfg: &HearthCfg,
) -> Result<ChatMessage, LlmError> {
    let request = CompletionRequest {
        messages,
        max_tokens: cfg.model_max_tokens,
        temperature: cfg.model_temperature,
        tools: vec![tool_definition()],
    };
    let response = provider.complete(request).await?;
    tracing::debug!(
        provider = provider.name(),
        stop_reason = ?response.stop_reason,
        tool_calls = response.tool_calls.len(),
        input_tokens = response.input_tokens,
        output_tokens = response.output_tokens,
        "model response received"
    );
    Ok(response.into_message())
}

/// Final spoken text for a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Speech {
    /// Hand the turn off: speak the user's utterance back verbatim.
    HandOff(String),
    Say(String),
}

/// True when `content` carries any configured hand-off marker.
pub fn has_handoff_marker(content: &str, markers: &[String]) -> bool {
    markers.iter().any(|m| !m.is_empty() && content.contains(m.as_str()))
}

/// Choose the reply text.
///
/// A hand-off marker wins; otherwise more than one executed tool call gets
/// the generic confirmation, as does empty content.
pub fn compose_speech(cfg: &HearthCfg, content: Option<&str>, executed: usize, utterance: &str) -> Speech {
    let content = content.unwrap_or_default();
    if has_handoff_marker(content, &cfg.handoff_markers) {
        return Speech::HandOff(utterance.to_string());
    }
    if executed > 1 || content.trim().is_empty() {
        return Speech::Say(cfg.generic_confirmation.clone());
    }
    Speech::Say(content.to_string())
}

/// Apology text, error code and short summary for a failed turn.
pub fn apology(cfg: &HearthCfg, err: &TurnError) -> (String, ErrorCode, String) {
    let summary = err.to_string();
    match err {
        TurnError::Model(LlmError::RateLimited) => {
            (cfg.apology_rate_limited.clone(), ErrorCode::RateLimited, summary)
        }
        TurnError::Model(LlmError::ContentFiltered(_)) => {
            (cfg.apology_content_filtered.clone(), ErrorCode::ContentFiltered, summary)
        }
        _ => (
            cfg.apology_generic.replace("{error}", &summary),
            ErrorCode::Unknown,
            summary,
        ),
    }
}
