use std::time::Duration;

use hearth_llm::provider::ToolCall;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::HearthCfg;

/// Header carrying the cache service credential.
const KEY_HEADER: &str = "x-functions-key";

/// Payload registering a command/reply pair for future cache hits.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry {
    pub speaker_id: String,
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub command_text: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache transport error: {0}")]
    Transport(String),
    #[error("cache returned {0}")]
    Status(u16),
}

/// The external "was this answered before" service.
///
/// Lookups are best-effort: a miss, a timeout and a transport error all
/// read as "nothing cached".
#[async_trait::async_trait]
pub trait CacheService: Send + Sync {
    /// Raw cached message for (speaker, utterance), if any.
    async fn lookup(&self, speaker: &str, text: &str) -> Option<Value>;
    /// Usage-pattern descriptions for a speaker.
    async fn patterns(&self, speaker: &str) -> Vec<String>;
    async fn register(&self, entry: &CacheEntry) -> Result<(), CacheError>;
}

#[derive(Deserialize)]
struct PatternResponse {
    #[serde(default)]
    user_patterns: Vec<UserPattern>,
}

#[derive(Deserialize)]
struct UserPattern {
    pattern_description: String,
}

/// HTTP client for the cache, pattern and register endpoints.
/// An empty endpoint URL disables that call.
pub struct HttpCacheService {
    client: reqwest::Client,
    api_key: String,
    cache_url: String,
    pattern_url: String,
    register_url: String,
    cache_timeout: Duration,
    pattern_timeout: Duration,
    register_timeout: Duration,
}

impl HttpCacheService {
    pub fn new(cfg: &HearthCfg, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            cache_url: cfg.cache_url.clone(),
            pattern_url: cfg.pattern_url.clone(),
            register_url: cfg.register_url.clone(),
            cache_timeout: Duration::from_millis(cfg.cache_timeout_ms),
            pattern_timeout: Duration::from_millis(cfg.pattern_timeout_ms),
            register_timeout: Duration::from_millis(cfg.register_timeout_ms),
        }
    }

    async fn fetch_cached(&self, speaker: &str, text: &str) -> Result<Option<Value>, CacheError> {
        let resp = self
            .client
            .post(&self.cache_url)
            .header(KEY_HEADER, &self.api_key)
            .timeout(self.cache_timeout)
            .json(&serde_json::json!({"speaker_id": speaker, "input_text": text}))
            .send()
            .await
            .map_err(|e| CacheError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(CacheError::Status(resp.status().as_u16()));
        }
        let value: Value = resp
            .json()
            .await
            .map_err(|e| CacheError::Transport(e.to_string()))?;
        Ok(match &value {
            Value::Null => None,
            Value::Object(o) if o.is_empty() => None,
            _ => Some(value),
        })
    }

    async fn fetch_patterns(&self, speaker: &str) -> Result<Vec<String>, CacheError> {
        let resp = self
            .client
            .get(&self.pattern_url)
            .header(KEY_HEADER, &self.api_key)
            .timeout(self.pattern_timeout)
            .query(&[("mac_address", speaker.to_uppercase())])
            .send()
            .await
            .map_err(|e| CacheError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(CacheError::Status(resp.status().as_u16()));
        }
        let body: PatternResponse = resp
            .json()
            .await
            .map_err(|e| CacheError::Transport(e.to_string()))?;
        Ok(body
            .user_patterns
            .into_iter()
            .map(|p| p.pattern_description)
            .collect())
    }
}

#[async_trait::async_trait]
impl CacheService for HttpCacheService {
    async fn lookup(&self, speaker: &str, text: &str) -> Option<Value> {
        if self.cache_url.is_empty() {
            return None;
        }
        match self.fetch_cached(speaker, text).await {
            Ok(hit) => {
                tracing::debug!(speaker, hit = hit.is_some(), "cache lookup");
                hit
            }
            Err(e) => {
                tracing::info!(speaker, error = %e, "cache lookup failed; treating as miss");
                None
            }
        }
    }

    async fn patterns(&self, speaker: &str) -> Vec<String> {
        if self.pattern_url.is_empty() {
            return Vec::new();
        }
        match self.fetch_patterns(speaker).await {
            Ok(patterns) => {
                tracing::debug!(speaker, count = patterns.len(), "speaker patterns fetched");
                patterns
            }
            Err(e) => {
                tracing::info!(speaker, error = %e, "pattern lookup failed; using none");
                Vec::new()
            }
        }
    }

    async fn register(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        if self.register_url.is_empty() {
            return Ok(());
        }
        let resp = self
            .client
            .post(&self.register_url)
            .header(KEY_HEADER, &self.api_key)
            .timeout(self.register_timeout)
            .json(entry)
            .send()
            .await
            .map_err(|e| CacheError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(CacheError::Status(resp.status().as_u16()));
        }
        tracing::info!(speaker = %entry.speaker_id, command = %entry.command_text, "cache entry registered");
        Ok(())
    }
}

/// No cache at all: every lookup misses, registration is dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledCache;

#[async_trait::async_trait]
impl CacheService for DisabledCache {
    async fn lookup(&self, _speaker: &str, _text: &str) -> Option<Value> {
        None
    }

    async fn patterns(&self, _speaker: &str) -> Vec<String> {
        Vec::new()
    }

    async fn register(&self, _entry: &CacheEntry) -> Result<(), CacheError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn service(server: &MockServer) -> HttpCacheService {
        let cfg = HearthCfg {
            cache_url: server.url("/cache"),
            pattern_url: server.url("/patterns"),
            register_url: server.url("/register"),
            ..HearthCfg::default()
        };
        HttpCacheService::new(&cfg, "k3y")
    }

    #[tokio::test]
    async fn lookup_hit_returns_payload() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/cache")
                    .header(KEY_HEADER, "k3y")
                    .json_body(json!({"speaker_id": "s1", "input_text": "lights on"}));
                then.status(200).json_body(json!({"role": "assistant", "content": "done"}));
            })
            .await;

        let hit = service(&server).lookup("s1", "lights on").await;
        mock.assert_async().await;
        assert_eq!(hit, Some(json!({"role": "assistant", "content": "done"})));
    }

    #[tokio::test]
    async fn lookup_non_200_or_empty_is_miss() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/cache").json_body_partial(r#"{"input_text": "a"}"#);
                then.status(404);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/cache").json_body_partial(r#"{"input_text": "b"}"#);
                then.status(200).json_body(json!({}));
            })
            .await;

        let svc = service(&server);
        assert!(svc.lookup("s1", "a").await.is_none());
        assert!(svc.lookup("s1", "b").await.is_none());
    }

    #[tokio::test]
    async fn unreachable_cache_is_miss() {
        let cfg = HearthCfg {
            cache_url: "http://127.0.0.1:1/cache".into(),
            cache_timeout_ms: 200,
            ..HearthCfg::default()
        };
        let svc = HttpCacheService::new(&cfg, "k");
        assert!(svc.lookup("s1", "x").await.is_none());
    }

    #[tokio::test]
    async fn patterns_query_uses_uppercased_speaker() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/patterns")
                    .query_param("mac_address", "AA:BB:CC:01")
                    .header(KEY_HEADER, "k3y");
                then.status(200).json_body(json!({
                    "user_patterns": [
                        {"pattern_description": "Weekdays 7am: air purifier on", "score": 0.9},
                        {"pattern_description": "Nightly 10pm: lights off"}
                    ]
                }));
            })
            .await;

        let patterns = service(&server).patterns("aa:bb:cc:01").await;
        mock.assert_async().await;
        assert_eq!(
            patterns,
            vec!["Weekdays 7am: air purifier on", "Nightly 10pm: lights off"]
        );
    }

    #[tokio::test]
    async fn register_posts_entry() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/register").json_body(json!({
                    "speaker_id": "s1",
                    "content": "Turning on.",
                    "tool_calls": [],
                    "command_text": "lights on"
                }));
                then.status(200);
            })
            .await;

        let entry = CacheEntry {
            speaker_id: "s1".into(),
            content: Some("Turning on.".into()),
            tool_calls: vec![],
            command_text: "lights on".into(),
        };
        service(&server).register(&entry).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn disabled_endpoints_skip_network() {
        let svc = HttpCacheService::new(&HearthCfg::default(), "k");
        assert!(svc.lookup("s", "x").await.is_none());
        assert!(svc.patterns("s").await.is_empty());
        let entry = CacheEntry {
            speaker_id: "s".into(),
            content: None,
            tool_calls: vec![],
            command_text: "x".into(),
        };
        assert!(svc.register(&entry).await.is_ok());
    }
}
