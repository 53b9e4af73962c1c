use std::collections::HashSet;
use std::sync::Arc;

use super::automation::{AutomationConfig, AutomationStore};
use super::backend::{HomeBackend, ServiceCall};
use crate::cognition::normalizer::{ApiCall, ApiMethod};

/// What a matched endpoint does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// `/api/services/<domain>/<service>`
    ServiceCall,
    /// `/api/config/automation/config/<alias>`
    AutomationConfig,
}

/// One row of the route table: a minimum segment count plus literal
/// segments at fixed positions of the `/`-split endpoint.
#[derive(Debug, Clone)]
pub struct Route {
    pub name: &'static str,
    pub min_segments: usize,
    pub literals: Vec<(usize, &'static str)>,
    pub action: Action,
}

impl Route {
    pub fn new(
        name: &'static str,
        min_segments: usize,
        literals: &[(usize, &'static str)],
        action: Action,
    ) -> Self {
        Self { name, min_segments, literals: literals.to_vec(), action }
    }

    fn matches(&self, segments: &[&str]) -> bool {
        segments.len() >= self.min_segments
            && self.literals.iter().all(|(i, lit)| segments.get(*i) == Some(lit))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RouteTableError {
    #[error("route table is empty")]
    Empty,
    #[error("route '{route}': literal at segment {index} is beyond its minimum of {min}")]
    LiteralOutOfRange { route: &'static str, index: usize, min: usize },
    #[error("route '{0}' is declared twice")]
    Duplicate(&'static str),
}

/// Ordered endpoint routes, checked once when built. First match wins.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new(routes: Vec<Route>) -> Result<Self, RouteTableError> {
        if routes.is_empty() {
            return Err(RouteTableError::Empty);
        }
        let mut names = HashSet::new();
        for route in &routes {
            if !names.insert(route.name) {
                return Err(RouteTableError::Duplicate(route.name));
            }
            if let Some((index, _)) = route.literals.iter().find(|(i, _)| *i >= route.min_segments) {
                return Err(RouteTableError::LiteralOutOfRange {
                    route: route.name,
                    index: *index,
                    min: route.min_segments,
                });
            }
        }
        Ok(Self { routes })
    }

    /// The Home Assistant REST surface the model may address.
    /// Segment 0 is the empty string before the leading `/`.
    pub fn home_assistant() -> Result<Self, RouteTableError> {
        Self::new(vec![
            Route::new("service_call", 5, &[(2, "services")], Action::ServiceCall),
            Route::new(
                "automation_config",
                4,
                &[(2, "config"), (3, "automation")],
                Action::AutomationConfig,
            ),
        ])
    }

    pub fn resolve(&self, endpoint: &str) -> Option<Action> {
        let segments: Vec<&str> = endpoint.split('/').collect();
        self.routes
            .iter()
            .find(|r| r.matches(&segments))
            .map(|r| r.action)
    }
}

/// Result of one tool call, as recorded in the tool message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Success,
    Failed(String),
}

impl ToolOutcome {
    /// Tool message content.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::Failed(_) => "Failed",
        }
    }
}

/// Maps a decoded tool call onto exactly one backend effect.
/// Never fails past this layer; every problem becomes `ToolOutcome::Failed`.
pub struct Translator {
    routes: RouteTable,
    backend: Arc<dyn HomeBackend>,
    automations: Arc<dyn AutomationStore>,
}

impl Translator {
    pub fn new(
        routes: RouteTable,
        backend: Arc<dyn HomeBackend>,
        automations: Arc<dyn AutomationStore>,
    ) -> Self {
        Self { routes, backend, automations }
    }

    pub async fn execute(&self, call: &ApiCall) -> ToolOutcome {
        let outcome = match self.routes.resolve(&call.endpoint) {
            Some(Action::ServiceCall) => self.service_call(call).await,
            Some(Action::AutomationConfig) => self.automation_config(call).await,
            None => Err(format!("no route for {}", call.endpoint)),
        };
        match outcome {
            Ok(()) => ToolOutcome::Success,
            Err(reason) => {
                tracing::warn!(
                    method = ?call.method,
                    endpoint = %call.endpoint,
                    reason = %reason,
                    "tool call failed"
                );
                ToolOutcome::Failed(reason)
            }
        }
    }

    async fn service_call(&self, call: &ApiCall) -> Result<(), String> {
        let segments: Vec<&str> = call.endpoint.split('/').collect();
        let (Some(domain), Some(service)) = (segments.get(3), segments.get(4)) else {
            return Err(format!("malformed service endpoint {}", call.endpoint));
        };
        let service = ServiceCall::from_body(domain, service, &call.body);
        self.backend
            .call_service(&service)
            .await
            .map_err(|e| e.to_string())
    }

    async fn automation_config(&self, call: &ApiCall) -> Result<(), String> {
        let alias = call.endpoint.rsplit('/').next().unwrap_or_default();
        match call.method {
            ApiMethod::Post => {
                let mut config = AutomationConfig::from_request(alias, &call.body);
                config.validate().map_err(|e| e.to_string())?;
                self.automations
                    .append(config)
                    .await
                    .map_err(|e| e.to_string())?;
            }
            ApiMethod::Delete => {
                self.automations
                    .remove_by_alias(alias)
                    .await
                    .map_err(|e| e.to_string())?;
            }
            ApiMethod::Get => return Err("automation config only supports post and delete".into()),
        }
        self.backend
            .reload_automations()
            .await
            .map_err(|e| e.to_string())
    }
}
