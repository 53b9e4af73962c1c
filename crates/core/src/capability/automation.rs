use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

/// One automation definition as stored in the automations file.
/// Keys this type does not model are kept in `extra` and written back as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationConfig {
    #[serde(default)]
    pub id: String,
    pub alias: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub trigger: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub condition: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub action: Value,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_mode() -> String {
    "single".to_string()
}

impl AutomationConfig {
    /// Build from a create request: alias from the endpoint, id from the body
    /// when present, every other body key copied through unchanged.
    pub fn from_request(alias: &str, body: &Value) -> Self {
        let field = |key: &str| body.get(key).cloned().unwrap_or(Value::Null);
        let extra: Map<String, Value> = body
            .as_object()
            .map(|o| {
                o.iter()
                    .filter(|(k, _)| !MODELED_KEYS.contains(&k.as_str()))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            id: body
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(generate_id),
            alias: alias.to_string(),
            trigger: field("trigger"),
            condition: field("condition"),
            action: field("action"),
            mode: default_mode(),
            extra,
        }
    }

    /// Backfill an empty id; only the alias is required. Trigger, condition
    /// and action are stored as given, empty or not.
    pub fn validate(&mut self) -> Result<(), AutomationError> {
        if self.id.trim().is_empty() {
            self.id = generate_id();
        }
        if self.alias.trim().is_empty() {
            return Err(AutomationError::Invalid("alias is empty".into()));
        }
        Ok(())
    }
}

/// Body keys with a dedicated field; the alias always comes from the endpoint.
const MODELED_KEYS: &[&str] = &["id", "alias", "trigger", "condition", "action", "mode"];

fn generate_id() -> String {
    format!("auto_{}", Uuid::new_v4().simple())
}

#[derive(Debug, thiserror::Error)]
pub enum AutomationError {
    #[error("automations file: {0}")]
    Io(#[from] std::io::Error),
    #[error("automations file is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid automation: {0}")]
    Invalid(String),
}

/// Ordered list of automation definitions.
#[async_trait::async_trait]
pub trait AutomationStore: Send + Sync {
    async fn list(&self) -> Result<Vec<AutomationConfig>, AutomationError>;
    /// Append unconditionally; repeating a create adds a second entry.
    async fn append(&self, config: AutomationConfig) -> Result<(), AutomationError>;
    /// Remove the first entry with `alias`. Returns false when none matched.
    async fn remove_by_alias(&self, alias: &str) -> Result<bool, AutomationError>;
}

/// Automations kept in a YAML list on disk, read-modify-written per mutation.
pub struct YamlAutomationStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl YamlAutomationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    async fn read(&self) -> Result<Vec<AutomationConfig>, AutomationError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let entries: Option<Vec<AutomationConfig>> = serde_yaml::from_str(&text)?;
        Ok(entries.unwrap_or_default())
    }

    async fn write(&self, entries: &[AutomationConfig]) -> Result<(), AutomationError> {
        let text = serde_yaml::to_string(entries)?;
        let tmp = self.path.with_extension("yaml.tmp");
        tokio::fs::write(&tmp, text).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl AutomationStore for YamlAutomationStore {
    async fn list(&self) -> Result<Vec<AutomationConfig>, AutomationError> {
        let _guard = self.lock.lock().await;
        self.read().await
    }

    async fn append(&self, config: AutomationConfig) -> Result<(), AutomationError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read().await?;
        tracing::info!(id = %config.id, alias = %config.alias, "automation saved");
        entries.push(config);
        self.write(&entries).await
    }

    async fn remove_by_alias(&self, alias: &str) -> Result<bool, AutomationError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read().await?;
        let Some(idx) = entries.iter().position(|a| a.alias == alias) else {
            tracing::debug!(alias, "no automation with alias; nothing deleted");
            return Ok(false);
        };
        let removed = entries.remove(idx);
        self.write(&entries).await?;
        tracing::info!(id = %removed.id, alias, "automation deleted");
        Ok(true)
    }
}

/// In-process automation list.
#[derive(Debug, Default)]
pub struct MemoryAutomationStore {
    entries: Mutex<Vec<AutomationConfig>>,
}

impl MemoryAutomationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl AutomationStore for MemoryAutomationStore {
    async fn list(&self) -> Result<Vec<AutomationConfig>, AutomationError> {
        Ok(self.entries.lock().await.clone())
    }

    async fn append(&self, config: AutomationConfig) -> Result<(), AutomationError> {
        self.entries.lock().await.push(config);
        Ok(())
    }

    async fn remove_by_alias(&self, alias: &str) -> Result<bool, AutomationError> {
        let mut entries = self.entries.lock().await;
        match entries.iter().position(|a| a.alias == alias) {
            Some(idx) => {
                entries.remove(idx);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn evening_lights() -> AutomationConfig {
        AutomationConfig::from_request(
            "evening_lights",
            &json!({
                "trigger": {"platform": "time", "at": "18:00:00"},
                "action": [{"service": "light.turn_on", "data": {"entity_id": "light.living_room"}}]
            }),
        )
    }

    #[test]
    fn request_builds_config_with_defaults() {
        let cfg = evening_lights();
        assert!(cfg.id.starts_with("auto_"));
        assert_eq!(cfg.alias, "evening_lights");
        assert_eq!(cfg.mode, "single");
        assert_eq!(cfg.condition, Value::Null);
    }

    #[test]
    fn body_id_is_kept() {
        let cfg = AutomationConfig::from_request("x", &json!({"id": "fixed", "trigger": {}, "action": []}));
        assert_eq!(cfg.id, "fixed");
    }

    #[test]
    fn validate_backfills_id_and_requires_alias() {
        let mut cfg = evening_lights();
        cfg.id.clear();
        cfg.validate().unwrap();
        assert!(!cfg.id.is_empty());

        let mut no_alias = AutomationConfig::from_request(" ", &json!({"trigger": {"platform": "time"}}));
        assert!(matches!(no_alias.validate(), Err(AutomationError::Invalid(_))));
    }

    #[test]
    fn empty_parts_are_stored_as_given() {
        let mut cfg = AutomationConfig::from_request(
            "my_alias",
            &json!({"trigger": [], "condition": [], "action": []}),
        );
        cfg.validate().unwrap();
        assert_eq!(cfg.trigger, json!([]));
        assert_eq!(cfg.condition, json!([]));
        assert_eq!(cfg.action, json!([]));
    }

    #[test]
    fn unmodeled_body_keys_pass_through() {
        let mut cfg = AutomationConfig::from_request(
            "plural",
            &json!({
                "alias": "Readable name",
                "triggers": [{"trigger": "time", "at": "07:00:00"}],
                "actions": [{"action": "fan.turn_on"}],
                "description": "morning fan"
            }),
        );
        cfg.validate().unwrap();
        assert_eq!(cfg.alias, "plural");
        assert_eq!(cfg.trigger, Value::Null);
        assert_eq!(cfg.extra.get("triggers"), Some(&json!([{"trigger": "time", "at": "07:00:00"}])));
        assert_eq!(cfg.extra.get("actions"), Some(&json!([{"action": "fan.turn_on"}])));
        assert!(!cfg.extra.contains_key("alias"));

        let yaml = serde_yaml::to_string(&cfg).unwrap();
        assert!(yaml.contains("triggers:"));
        assert!(!yaml.contains("trigger: null"));
    }

    #[tokio::test]
    async fn yaml_store_appends_and_deletes_first_match() {
        let dir = tempfile::tempdir().unwrap();
        let store = YamlAutomationStore::new(dir.path().join("automations.yaml"));
        assert!(store.list().await.unwrap().is_empty());

        store.append(evening_lights()).await.unwrap();
        store.append(evening_lights()).await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 2);

        assert!(store.remove_by_alias("evening_lights").await.unwrap());
        assert_eq!(store.list().await.unwrap().len(), 1);
        assert!(!store.remove_by_alias("missing").await.unwrap());
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn yaml_store_preserves_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("automations.yaml");
        tokio::fs::write(
            &path,
            "- id: '1700000000000'\n  alias: Porch\n  description: from the UI\n  trigger: []\n  action: []\n  mode: restart\n",
        )
        .await
        .unwrap();

        let store = YamlAutomationStore::new(&path);
        store.append(evening_lights()).await.unwrap();

        let entries = store.list().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].mode, "restart");
        assert_eq!(entries[0].extra.get("description"), Some(&json!("from the UI")));
    }

    #[tokio::test]
    async fn memory_store_delete_unknown_is_noop() {
        let store = MemoryAutomationStore::new();
        store.append(evening_lights()).await.unwrap();
        assert!(!store.remove_by_alias("nope").await.unwrap());
        assert_eq!(store.list().await.unwrap().len(), 1);
    }
}
