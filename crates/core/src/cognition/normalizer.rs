use hearth_llm::provider::{ChatMessage, ToolCall};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The single tool exposed to the model.
pub const TOOL_NAME: &str = "home_assistant_api";
/// Endpoint token replaced with a fresh id before execution.
pub const AUTOMATION_ID_PLACEHOLDER: &str = "{automation_id}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiMethod {
    Get,
    Post,
    Delete,
}

/// Decoded tool-call arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiCall {
    pub method: ApiMethod,
    pub endpoint: String,
    #[serde(default = "empty_object", deserialize_with = "null_as_object")]
    pub body: Value,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

fn null_as_object<'de, D>(deserializer: D) -> Result<Value, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    Ok(if v.is_null() { empty_object() } else { v })
}

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("tool call {id}: invalid arguments: {source}")]
    Arguments {
        id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("cached payload has no role")]
    MissingRole,
    #[error("cached payload is malformed: {0}")]
    CachedPayload(String),
}

/// Decode the string-encoded arguments of a model tool call.
///
/// Only the arguments matter; a call under another name (older cached
/// history named calls after their endpoint) is decoded the same way.
pub fn decode_call(call: &ToolCall) -> Result<ApiCall, NormalizeError> {
    if call.function.name != TOOL_NAME {
        tracing::warn!(call_id = %call.id, name = %call.function.name, "tool call under unexpected name");
    }
    serde_json::from_str(&call.function.arguments).map_err(|source| NormalizeError::Arguments {
        id: call.id.clone(),
        source,
    })
}

/// Replace the automation-id placeholder with a fresh unique token.
pub fn resolve_call(mut call: ApiCall) -> ApiCall {
    if call.endpoint.contains(AUTOMATION_ID_PLACEHOLDER) {
        let token = Uuid::new_v4().simple().to_string();
        call.endpoint = call.endpoint.replace(AUTOMATION_ID_PLACEHOLDER, &token);
    }
    call
}

/// Re-encode arguments to the string form the protocol carries.
pub fn encode_call(id: &str, call: &ApiCall) -> ToolCall {
    // ApiCall only holds JSON-native data, so serialization cannot fail.
    let arguments = serde_json::to_string(call).unwrap_or_else(|_| "{}".to_string());
    ToolCall::function(id, TOOL_NAME, arguments)
}

/// Decode, resolve and re-encode one tool call.
/// Returns the call to persist plus the call to execute.
pub fn normalize_call(call: &ToolCall) -> Result<(ToolCall, ApiCall), NormalizeError> {
    let resolved = resolve_call(decode_call(call)?);
    Ok((encode_call(&call.id, &resolved), resolved))
}

/// How many actions an assistant message asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    PlainText,
    SingleAction,
    MultiAction(usize),
}

impl ResponseShape {
    pub fn of(message: &ChatMessage) -> Self {
        match message.tool_calls().len() {
            0 => Self::PlainText,
            1 => Self::SingleAction,
            n => Self::MultiAction(n),
        }
    }
}

#[derive(Deserialize)]
struct CachedToolCall {
    id: String,
    function: CachedFunction,
}

#[derive(Deserialize)]
struct CachedFunction {
    name: String,
    arguments: Value,
}

/// Turn a cached payload into an assistant message.
///
/// `role` is required. Tool-call arguments may be JSON strings or objects;
/// objects are re-encoded to strings.
pub fn assistant_from_cached(payload: &Value) -> Result<ChatMessage, NormalizeError> {
    let role = payload
        .get("role")
        .and_then(Value::as_str)
        .filter(|r| !r.is_empty())
        .ok_or(NormalizeError::MissingRole)?;
    if role != "assistant" {
        tracing::warn!(role, "cached payload role is not assistant; treating it as one");
    }

    let content = match payload.get("content") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => {
            return Err(NormalizeError::CachedPayload(format!(
                "content must be a string, got {other}"
            )));
        }
    };

    let raw_calls: Vec<CachedToolCall> = match payload.get("tool_calls") {
        None | Some(Value::Null) => Vec::new(),
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| NormalizeError::CachedPayload(format!("tool_calls: {e}")))?,
    };

    let tool_calls = raw_calls
        .into_iter()
        .map(|c| {
            let arguments = match c.function.arguments {
                Value::String(s) => s,
                other => other.to_string(),
            };
            ToolCall::function(c.id, c.function.name, arguments)
        })
        .collect();

    Ok(ChatMessage::Assistant { content, tool_calls })
}
