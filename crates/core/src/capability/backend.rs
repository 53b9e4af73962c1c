use std::sync::Mutex;
use std::time::Duration;

use serde_json::{Map, Value};

/// Entity domains hidden from the model's state snapshot.
const HIDDEN_STATE_DOMAINS: &[&str] = &["update", "tts"];

/// Service domains hidden from the model's service catalog.
const HIDDEN_SERVICE_DOMAINS: &[&str] = &[
    "homeassistant",
    "persistent_notification",
    "system_log",
    "logger",
    "person",
    "frontend",
    "recorder",
    "hassio",
    "update",
    "cloud",
    "ffmpeg",
    "tts",
    "scene",
    "input_button",
    "logbook",
    "script",
    "input_select",
    "input_boolean",
    "input_number",
    "zone",
    "conversation",
    "input_datetime",
    "shopping_list",
    "input_text",
    "counter",
    "openai_conversation",
    "button",
    "notify",
    "device_tracker",
    "number",
    "select",
];

/// One service invocation: `domain.service` on `target` with `data`.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceCall {
    pub domain: String,
    pub service: String,
    /// Entity id (string or list), lifted out of the request body.
    pub target: Option<Value>,
    pub data: Map<String, Value>,
}

impl ServiceCall {
    /// Split a request body into target and service data.
    pub fn from_body(domain: &str, service: &str, body: &Value) -> Self {
        let mut data = body.as_object().cloned().unwrap_or_default();
        let target = data.remove("entity_id");
        Self {
            domain: domain.to_string(),
            service: service.to_string(),
            target,
            data,
        }
    }

    /// REST payload: service data with the target merged back in.
    pub fn payload(&self) -> Value {
        let mut body = self.data.clone();
        if let Some(target) = &self.target {
            body.insert("entity_id".into(), target.clone());
        }
        Value::Object(body)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend transport error: {0}")]
    Transport(String),
    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("backend rejected call: {0}")]
    Rejected(String),
}

/// Effects on the smart home: service calls and automation reloads.
#[async_trait::async_trait]
pub trait HomeBackend: Send + Sync {
    /// Blocking service call; returns once the backend has applied it.
    async fn call_service(&self, call: &ServiceCall) -> Result<(), BackendError>;
    async fn reload_automations(&self) -> Result<(), BackendError>;
}

/// Read-only view of the home: entity states and the service catalog.
#[async_trait::async_trait]
pub trait HomeDirectory: Send + Sync {
    async fn states(&self) -> Result<Vec<Value>, BackendError>;
    async fn services(&self) -> Result<Vec<Value>, BackendError>;
}

/// Home Assistant over its REST API, authenticated with a long-lived token.
pub struct HttpHomeBackend {
    client: reqwest::Client,
    base_url: String,
    token: String,
    timeout: Duration,
}

impl HttpHomeBackend {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Self {
        let base_url: String = base_url.into();
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
            timeout,
        }
    }

    async fn post(&self, path: &str, body: &Value) -> Result<(), BackendError> {
        let resp = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        check_status(resp).await.map(|_| ())
    }

    async fn get_list(&self, path: &str) -> Result<Vec<Value>, BackendError> {
        let resp = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        check_status(resp)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(BackendError::Status { status, body })
}

#[async_trait::async_trait]
impl HomeBackend for HttpHomeBackend {
    async fn call_service(&self, call: &ServiceCall) -> Result<(), BackendError> {
        tracing::info!(domain = %call.domain, service = %call.service, "calling service");
        self.post(
            &format!("/api/services/{}/{}", call.domain, call.service),
            &call.payload(),
        )
        .await
    }

    async fn reload_automations(&self) -> Result<(), BackendError> {
        self.post("/api/services/automation/reload", &Value::Object(Map::new()))
            .await
    }
}

#[async_trait::async_trait]
impl HomeDirectory for HttpHomeBackend {
    async fn states(&self) -> Result<Vec<Value>, BackendError> {
        Ok(filter_states(self.get_list("/api/states").await?))
    }

    async fn services(&self) -> Result<Vec<Value>, BackendError> {
        Ok(filter_services(self.get_list("/api/services").await?))
    }
}

fn filter_states(states: Vec<Value>) -> Vec<Value> {
    states
        .into_iter()
        .filter(|s| {
            let domain = s
                .get("entity_id")
                .and_then(Value::as_str)
                .and_then(|id| id.split('.').next())
                .unwrap_or_default();
            !HIDDEN_STATE_DOMAINS.contains(&domain)
        })
        .collect()
}

fn filter_services(services: Vec<Value>) -> Vec<Value> {
    services
        .into_iter()
        .filter(|s| {
            let domain = s.get("domain").and_then(Value::as_str).unwrap_or_default();
            !HIDDEN_SERVICE_DOMAINS.contains(&domain)
        })
        .collect()
}

/// Backend that records effects instead of applying them.
/// Used when no home is configured, and by tests.
#[derive(Debug, Default)]
pub struct DryRunBackend {
    calls: Mutex<Vec<ServiceCall>>,
    reloads: Mutex<usize>,
    failing_domains: Vec<String>,
}

impl DryRunBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Service calls in these domains fail with `Rejected`.
    pub fn failing_on(domains: &[&str]) -> Self {
        Self {
            failing_domains: domains.iter().map(|d| d.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<ServiceCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn reload_count(&self) -> usize {
        self.reloads.lock().map(|r| *r).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl HomeBackend for DryRunBackend {
    async fn call_service(&self, call: &ServiceCall) -> Result<(), BackendError> {
        if self.failing_domains.contains(&call.domain) {
            return Err(BackendError::Rejected(format!(
                "{}.{} unavailable",
                call.domain, call.service
            )));
        }
        tracing::info!(domain = %call.domain, service = %call.service, "dry run: service call");
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call.clone());
        }
        Ok(())
    }

    async fn reload_automations(&self) -> Result<(), BackendError> {
        if let Ok(mut reloads) = self.reloads.lock() {
            *reloads += 1;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl HomeDirectory for DryRunBackend {
    async fn states(&self) -> Result<Vec<Value>, BackendError> {
        Ok(Vec::new())
    }

    async fn services(&self) -> Result<Vec<Value>, BackendError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[test]
    fn body_splits_into_target_and_data() {
        let call = ServiceCall::from_body(
            "light",
            "turn_on",
            &json!({"entity_id": "light.kitchen", "brightness_pct": 40}),
        );
        assert_eq!(call.target, Some(json!("light.kitchen")));
        assert_eq!(call.data.get("brightness_pct"), Some(&json!(40)));
        assert!(!call.data.contains_key("entity_id"));
        assert_eq!(
            call.payload(),
            json!({"entity_id": "light.kitchen", "brightness_pct": 40})
        );
    }

    #[test]
    fn non_object_body_means_no_target() {
        let call = ServiceCall::from_body("scene", "apply", &json!(null));
        assert!(call.target.is_none());
        assert!(call.data.is_empty());
    }

    #[test]
    fn noisy_domains_are_filtered() {
        let states = filter_states(vec![
            json!({"entity_id": "light.kitchen", "state": "on"}),
            json!({"entity_id": "update.core", "state": "off"}),
            json!({"entity_id": "tts.google", "state": "idle"}),
        ]);
        assert_eq!(states.len(), 1);

        let services = filter_services(vec![
            json!({"domain": "light", "services": {}}),
            json!({"domain": "logger", "services": {}}),
            json!({"domain": "input_boolean", "services": {}}),
        ]);
        assert_eq!(services.len(), 1);
        assert_eq!(services[0]["domain"], "light");
    }

    #[tokio::test]
    async fn posts_service_call_with_token() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/services/light/turn_on")
                    .header("authorization", "Bearer secret")
                    .json_body(json!({"entity_id": "light.kitchen"}));
                then.status(200).json_body(json!([]));
            })
            .await;

        let backend = HttpHomeBackend::new(server.base_url(), "secret", Duration::from_secs(2));
        let call = ServiceCall::from_body("light", "turn_on", &json!({"entity_id": "light.kitchen"}));
        backend.call_service(&call).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/services/lock/unlock");
                then.status(400).body("bad entity");
            })
            .await;

        let backend = HttpHomeBackend::new(server.base_url(), "secret", Duration::from_secs(2));
        let call = ServiceCall::from_body("lock", "unlock", &json!({}));
        let err = backend.call_service(&call).await.unwrap_err();
        assert!(matches!(err, BackendError::Status { status: 400, .. }));
    }

    #[tokio::test]
    async fn directory_fetches_and_filters_states() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/states");
                then.status(200).json_body(json!([
                    {"entity_id": "light.kitchen", "state": "on"},
                    {"entity_id": "update.core", "state": "off"}
                ]));
            })
            .await;

        let backend = HttpHomeBackend::new(server.base_url(), "secret", Duration::from_secs(2));
        let states = backend.states().await.unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0]["entity_id"], "light.kitchen");
    }

    #[tokio::test]
    async fn dry_run_records_and_fails_by_domain() {
        let backend = DryRunBackend::failing_on(&["lock"]);
        let ok = ServiceCall::from_body("light", "turn_on", &json!({}));
        let bad = ServiceCall::from_body("lock", "unlock", &json!({}));
        backend.call_service(&ok).await.unwrap();
        assert!(backend.call_service(&bad).await.is_err());
        backend.reload_automations().await.unwrap();
        assert_eq!(backend.calls(), vec![ok]);
        assert_eq!(backend.reload_count(), 1);
    }
}
