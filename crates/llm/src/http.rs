//! HTTP-based LLM providers.
//!
//! Speaks the chat-completions protocol with native tool calls, either against
//! OpenAI-compatible endpoints or an Azure OpenAI deployment.

use crate::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, LlmError, LlmProvider, StopReason, ToolCall,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// API version used for Azure deployments when none is configured.
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-08-01-preview";

/// Whole-request timeout when none is configured.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Inferred provider kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    /// Azure OpenAI: model name is the deployment name, auth via `api-key`.
    Azure,
    /// Falls back to OpenAI-compatible format.
    Unknown,
}

impl ProviderKind {
    /// Infer provider from model name and base URL.
    pub fn infer(model: &str, base_url: Option<&str>) -> Self {
        if base_url.is_some_and(|u| u.to_lowercase().contains(".openai.azure.com")) {
            return Self::Azure;
        }
        let m = model.to_lowercase();
        if m.starts_with("gpt-")
            || m.starts_with("o1-")
            || m.starts_with("o3-")
            || m.starts_with("o4-")
        {
            Self::OpenAi
        } else {
            Self::Unknown
        }
    }

    fn default_base_url(self) -> &'static str {
        "https://api.openai.com/v1"
    }
}

// ── chat-completions request/response types ──

#[derive(Serialize)]
struct OaiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OaiTool<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct OaiTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: OaiFunction<'a>,
}

#[derive(Serialize)]
struct OaiFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

#[derive(Deserialize)]
struct OaiResponse {
    choices: Vec<OaiChoice>,
    usage: Option<OaiUsage>,
}

#[derive(Deserialize)]
struct OaiChoice {
    message: OaiChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OaiChoiceMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Deserialize)]
struct OaiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Deserialize)]
struct OaiErrorEnvelope {
    error: OaiErrorBody,
}

#[derive(Deserialize)]
struct OaiErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    innererror: Option<OaiInnerError>,
}

#[derive(Deserialize)]
struct OaiInnerError {
    #[serde(default)]
    code: Option<String>,
}

// ── Provider ──

/// HTTP-based chat-completions provider.
pub struct HttpProvider {
    kind: ProviderKind,
    model: String,
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    api_version: String,
    timeout: Duration,
}

impl HttpProvider {
    /// Build from model (or Azure deployment) name + API key + optional base URL override.
    pub fn new(model: String, api_key: String, base_url: Option<String>) -> Self {
        let kind = ProviderKind::infer(&model, base_url.as_deref());
        let base = base_url.unwrap_or_else(|| kind.default_base_url().to_owned());
        Self {
            kind,
            model,
            client: reqwest::Client::new(),
            base_url: base.trim_end_matches('/').to_owned(),
            api_key,
            api_version: DEFAULT_AZURE_API_VERSION.to_owned(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Bound every completion request; an expired request is a transport error.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Force Azure mode with an explicit API version.
    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.kind = ProviderKind::Azure;
        self.api_version = api_version.into();
        self
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn endpoint(&self) -> String {
        match self.kind {
            ProviderKind::Azure => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                self.base_url, self.model, self.api_version
            ),
            ProviderKind::OpenAi | ProviderKind::Unknown => {
                format!("{}/chat/completions", self.base_url)
            }
        }
    }

    async fn complete_chat(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = OaiRequest {
            model: &self.model,
            messages: &request.messages,
            tools: request
                .tools
                .iter()
                .map(|t| OaiTool {
                    kind: "function",
                    function: OaiFunction {
                        name: &t.name,
                        description: &t.description,
                        parameters: &t.input_schema,
                    },
                })
                .collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let builder = self
            .client
            .post(self.endpoint())
            .timeout(self.timeout)
            .json(&body);
        let builder = match self.kind {
            ProviderKind::Azure => builder.header("api-key", &self.api_key),
            ProviderKind::OpenAi | ProviderKind::Unknown => builder.bearer_auth(&self.api_key),
        };

        tracing::debug!(
            provider = self.name(),
            messages = request.messages.len(),
            tools = request.tools.len(),
            "sending chat completion request"
        );

        let resp = builder
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(check_error(status, &text));
        }

        let api: OaiResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let choice = api
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("response contained no choices".into()))?;

        let stop_reason = match choice.finish_reason.as_deref() {
            Some("tool_calls") => StopReason::ToolUse,
            Some("length") => StopReason::MaxTokens,
            Some("content_filter") => StopReason::ContentFilter,
            _ => StopReason::EndTurn,
        };
        if stop_reason == StopReason::ContentFilter {
            return Err(LlmError::ContentFiltered("completion stopped by content filter".into()));
        }

        let (input_tokens, output_tokens) = api
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((0, 0));

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_calls: choice.message.tool_calls.unwrap_or_default(),
            stop_reason,
            input_tokens,
            output_tokens,
        })
    }
}

/// Classify an error response: 429 is a rate limit, a content-filter code is
/// a policy rejection, anything else is a transport failure.
fn check_error(status: reqwest::StatusCode, body: &str) -> LlmError {
    if status.as_u16() == 429 {
        return LlmError::RateLimited;
    }
    if let Ok(envelope) = serde_json::from_str::<OaiErrorEnvelope>(body) {
        let err = envelope.error;
        let filtered = err.code.as_deref() == Some("content_filter")
            || err
                .innererror
                .as_ref()
                .and_then(|i| i.code.as_deref())
                == Some("ResponsibleAIPolicyViolation");
        if filtered {
            return LlmError::ContentFiltered(err.message.unwrap_or_default());
        }
    }
    LlmError::Transport(format!("{status}: {body}"))
}

impl LlmProvider for HttpProvider {
    fn name(&self) -> &str {
        match self.kind {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Azure => "azure-openai",
            ProviderKind::Unknown => "unknown",
        }
    }

    fn complete(
        &self,
        request: CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CompletionResponse, LlmError>> + Send + '_>> {
        Box::pin(self.complete_chat(request))
    }
}

/// Build an LlmProvider from environment variables.
/// Reads `HEARTH_LLM_MODEL`, `HEARTH_LLM_API_KEY`, optionally `HEARTH_LLM_BASE_URL`,
/// `HEARTH_LLM_API_VERSION` (forces Azure mode) and `HEARTH_LLM_TIMEOUT_SECS`.
/// Returns `None` if model or key is not set.
pub fn from_env() -> Option<HttpProvider> {
    let model = std::env::var("HEARTH_LLM_MODEL").ok()?;
    let api_key = std::env::var("HEARTH_LLM_API_KEY").ok()?;
    let base_url = std::env::var("HEARTH_LLM_BASE_URL").ok();
    let mut provider = HttpProvider::new(model, api_key, base_url);
    if let Some(secs) = std::env::var("HEARTH_LLM_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
    {
        provider = provider.with_timeout(Duration::from_secs(secs));
    }
    match std::env::var("HEARTH_LLM_API_VERSION") {
        Ok(version) => Some(provider.with_api_version(version)),
        Err(_) => Some(provider),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ToolDefinition;
    use httpmock::prelude::*;
    use serde_json::json;

    #[test]
    fn infer_openai_models() {
        assert_eq!(ProviderKind::infer("gpt-4o", None), ProviderKind::OpenAi);
        assert_eq!(ProviderKind::infer("o3-mini", None), ProviderKind::OpenAi);
        assert_eq!(ProviderKind::infer("GPT-4o-mini", None), ProviderKind::OpenAi);
    }

    #[test]
    fn infer_azure_from_base_url() {
        let kind = ProviderKind::infer("my-deployment", Some("https://acme.openai.azure.com/"));
        assert_eq!(kind, ProviderKind::Azure);
    }

    #[test]
    fn infer_unknown_falls_back() {
        assert_eq!(ProviderKind::infer("llama-3", None), ProviderKind::Unknown);
    }

    #[test]
    fn openai_endpoint() {
        let p = HttpProvider::new("gpt-4o".into(), "sk-test".into(), None);
        assert_eq!(p.endpoint(), "https://api.openai.com/v1/chat/completions");
        assert_eq!(p.name(), "openai");
    }

    #[test]
    fn azure_endpoint_uses_deployment_and_version() {
        let p = HttpProvider::new(
            "ha-tuned".into(),
            "key".into(),
            Some("https://acme.openai.azure.com/".into()),
        );
        assert_eq!(
            p.endpoint(),
            "https://acme.openai.azure.com/openai/deployments/ha-tuned/chat/completions?api-version=2024-08-01-preview"
        );
        assert_eq!(p.name(), "azure-openai");
    }

    #[test]
    fn rate_limit_status_maps_to_rate_limited() {
        let err = check_error(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(matches!(err, LlmError::RateLimited));
    }

    #[test]
    fn content_filter_body_maps_to_content_filtered() {
        let body = json!({
            "error": {
                "code": "content_filter",
                "message": "The response was filtered",
                "innererror": {"code": "ResponsibleAIPolicyViolation"}
            }
        })
        .to_string();
        let err = check_error(reqwest::StatusCode::BAD_REQUEST, &body);
        match err {
            LlmError::ContentFiltered(msg) => assert_eq!(msg, "The response was filtered"),
            other => panic!("expected ContentFiltered, got {other:?}"),
        }
    }

    #[test]
    fn other_errors_map_to_transport() {
        let err = check_error(reqwest::StatusCode::INTERNAL_SERVER_ERROR, "boom");
        assert!(matches!(err, LlmError::Transport(msg) if msg.contains("boom")));
    }

    #[tokio::test]
    async fn parses_tool_calls_from_completion() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200).json_body(json!({
                    "choices": [{
                        "index": 0,
                        "finish_reason": "tool_calls",
                        "message": {
                            "role": "assistant",
                            "content": null,
                            "tool_calls": [{
                                "id": "call_1",
                                "type": "function",
                                "function": {
                                    "name": "home_assistant_api",
                                    "arguments": "{\"method\":\"post\",\"endpoint\":\"/api/services/light/turn_on\"}"
                                }
                            }]
                        }
                    }],
                    "usage": {"prompt_tokens": 12, "completion_tokens": 7}
                }));
            })
            .await;

        let provider = HttpProvider::new(
            "gpt-4o".into(),
            "sk-test".into(),
            Some(format!("{}/v1", server.base_url())),
        );
        let request = CompletionRequest {
            messages: vec![ChatMessage::user("turn on the light")],
            max_tokens: 256,
            temperature: 0.0,
            tools: vec![ToolDefinition {
                name: "home_assistant_api".into(),
                description: "Home Assistant API".into(),
                input_schema: json!({"type": "object"}),
            }],
        };

        let resp = provider.complete(request).await.unwrap();
        mock.assert_async().await;
        assert_eq!(resp.stop_reason, StopReason::ToolUse);
        assert!(resp.content.is_empty());
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].function.name, "home_assistant_api");
        assert_eq!(resp.input_tokens, 12);
    }

    #[tokio::test]
    async fn rate_limited_completion() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(429).body("too many requests");
            })
            .await;

        let provider = HttpProvider::new(
            "gpt-4o".into(),
            "sk-test".into(),
            Some(format!("{}/v1", server.base_url())),
        );
        let request = CompletionRequest {
            messages: vec![ChatMessage::user("hi")],
            max_tokens: 16,
            temperature: 0.0,
            tools: vec![],
        };
        let err = provider.complete(request).await.unwrap_err();
        assert!(matches!(err, LlmError::RateLimited));
    }

    #[tokio::test]
    async fn slow_endpoint_times_out_as_transport_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200)
                    .delay(Duration::from_millis(500))
                    .json_body(json!({"choices": [{"message": {"content": "late"}, "finish_reason": "stop"}]}));
            })
            .await;

        let provider = HttpProvider::new(
            "gpt-4o".into(),
            "sk-test".into(),
            Some(format!("{}/v1", server.base_url())),
        )
        .with_timeout(Duration::from_millis(50));
        let request = CompletionRequest {
            messages: vec![ChatMessage::user("hi")],
            max_tokens: 16,
            temperature: 0.0,
            tools: vec![],
        };
        let err = provider.complete(request).await.unwrap_err();
        assert!(matches!(err, LlmError::Transport(_)));
    }
}
