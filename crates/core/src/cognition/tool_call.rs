use hearth_llm::provider::ChatMessage;

use super::normalizer::normalize_call;
use crate::capability::router::{ToolOutcome, Translator};

/// Outcome of running every tool call of one assistant message.
#[derive(Debug, Clone)]
pub struct Dispatch {
    /// The assistant message with arguments re-encoded as executed.
    pub assistant: ChatMessage,
    /// One tool message per call, in call order.
    pub tool_messages: Vec<ChatMessage>,
    /// Number of calls dispatched.
    pub executed: usize,
}

impl Dispatch {
    /// Assistant message followed by its tool messages, ready to persist.
    pub fn into_messages(self) -> Vec<ChatMessage> {
        std::iter::once(self.assistant).chain(self.tool_messages).collect()
    }
}

/// Run each tool call through normalization and the translator, strictly
/// in order. A call that fails to decode is recorded as `Failed` and left
/// as the model sent it.
pub async fn dispatch_tool_calls(translator: &Translator, message: ChatMessage) -> Dispatch {
    let (content, tool_calls) = match message {
        ChatMessage::Assistant { content, tool_calls } => (content, tool_calls),
        other => return Dispatch { assistant: other, tool_messages: Vec::new(), executed: 0 },
    };

    let mut persisted = Vec::with_capacity(tool_calls.len());
    let mut tool_messages = Vec::with_capacity(tool_calls.len());

    for (index, call) in tool_calls.into_iter().enumerate() {
        let outcome = match normalize_call(&call) {
            Ok((encoded, api)) => {
                tracing::info!(
                    index,
                    call_id = %call.id,
                    method = ?api.method,
                    endpoint = %api.endpoint,
                    "executing tool call"
                );
                let outcome = translator.execute(&api).await;
                persisted.push(encoded);
                outcome
            }
            Err(e) => {
                tracing::warn!(
                    index,
                    call_id = %call.id,
                    error = %e,
                    arguments_preview = %preview(&call.function.arguments, 160),
                    "tool call could not be decoded"
                );
                let outcome = ToolOutcome::Failed(e.to_string());
                persisted.push(call.clone());
                outcome
            }
        };
        tool_messages.push(ChatMessage::tool(call.id, outcome.as_str()));
    }

    let executed = tool_messages.len();
    Dispatch {
        assistant: ChatMessage::Assistant { content, tool_calls: persisted },
        tool_messages,
        executed,
    }
}

fn preview(s: &str, max: usize) -> String {
    let mut out: String = s.chars().take(max).collect();
    if s.chars().count() > max {
        out.push_str("...");
    }
    out
}
