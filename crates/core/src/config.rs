use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;

/// Prefix for environment overrides (`HEARTH_PROMOTE_WINDOW=6`).
const ENV_PREFIX: &str = "HEARTH_";

/// All hearth parameters. Loaded from the `hearth_config` table at startup.
/// First boot writes defaults; subsequent boots read existing values.
/// Credentials never live here; they come from the environment only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HearthCfg {
    // speakers
    pub default_speaker: String,

    // conversation log
    pub history_trigger_limit: usize,
    pub promote_window: usize,

    // outbound timeouts (ms)
    pub cache_timeout_ms: u64,
    pub pattern_timeout_ms: u64,
    pub register_timeout_ms: u64,
    pub backend_timeout_ms: u64,

    // reserved utterances and markers
    pub reset_phrase: String,
    pub register_cache_token: String,
    pub handoff_markers: Vec<String>,

    // user-facing strings
    pub reset_confirmation: String,
    pub generic_confirmation: String,
    /// `{command}` is replaced with the promoted user utterance.
    pub register_confirmation: String,
    pub register_not_found: String,
    pub apology_rate_limited: String,
    pub apology_content_filtered: String,
    /// `{error}` is replaced with a short error summary.
    pub apology_generic: String,

    // model
    pub model_max_tokens: u32,
    pub model_temperature: f32,

    // collaborators (empty URL = disabled)
    pub cache_url: String,
    pub pattern_url: String,
    pub register_url: String,
    pub home_base_url: String,
    pub automations_path: String,

    // status channel
    pub status_channel_capacity: usize,
}

impl Default for HearthCfg {
    fn default() -> Self {
        Self {
            default_speaker: "default".into(),
            history_trigger_limit: 20,
            promote_window: 4,
            cache_timeout_ms: 3000,
            pattern_timeout_ms: 3000,
            register_timeout_ms: 3000,
            backend_timeout_ms: 10_000,
            reset_phrase: "reset conversation".into(),
            register_cache_token: "register_cache".into(),
            handoff_markers: vec![
                "googlecast_domain_flg".into(),
                "googlecast_domain_flag".into(),
            ],
            reset_confirmation: "Conversation cleared.".into(),
            generic_confirmation: "Executing your request.".into(),
            register_confirmation: "Registered \"{command}\" as a cached command.".into(),
            register_not_found: "Could not find a previous control command.".into(),
            apology_rate_limited: "Sorry, too many requests right now. Please try again in a moment.".into(),
            apology_content_filtered: "Sorry, I can't help with that request.".into(),
            apology_generic: "Sorry, I had a problem handling that: {error}".into(),
            model_max_tokens: 1024,
            model_temperature: 0.3,
            cache_url: String::new(),
            pattern_url: String::new(),
            register_url: String::new(),
            home_base_url: "http://localhost:8123".into(),
            automations_path: "automations.yaml".into(),
            status_channel_capacity: 64,
        }
    }
}

impl HearthCfg {
    /// Load config from `hearth_config` table. If table is empty, seed with defaults.
    pub async fn load(pool: &PgPool) -> Result<Self, sqlx::Error> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM hearth_config")
                .fetch_all(pool)
                .await?;

        if rows.is_empty() {
            let cfg = Self::default();
            cfg.seed(pool).await?;
            return Ok(cfg);
        }

        let map: HashMap<String, String> = rows.into_iter().collect();
        Ok(Self::from_map(&map))
    }

    /// Build config from `HEARTH_*` environment variables over defaults.
    pub fn from_env() -> Self {
        Self::from_map(&env_map(std::env::vars()))
    }

    /// Write all default values into `hearth_config` table.
    async fn seed(&self, pool: &PgPool) -> Result<(), sqlx::Error> {
        let entries = self.to_entries();
        for (key, value, desc) in &entries {
            sqlx::query(
                "INSERT INTO hearth_config (key, value, description) VALUES ($1, $2, $3) \
                 ON CONFLICT (key) DO NOTHING",
            )
            .bind(key)
            .bind(value)
            .bind(desc)
            .execute(pool)
            .await?;
        }
        Ok(())
    }

    pub(crate) fn from_map(m: &HashMap<String, String>) -> Self {
        let d = Self::default();
        Self {
            default_speaker: get_or(m, "default_speaker", d.default_speaker),
            // 0 would trim away the message just added
            history_trigger_limit: get_or(m, "history_trigger_limit", d.history_trigger_limit).max(1),
            promote_window: get_or(m, "promote_window", d.promote_window),
            cache_timeout_ms: get_or(m, "cache_timeout_ms", d.cache_timeout_ms),
            pattern_timeout_ms: get_or(m, "pattern_timeout_ms", d.pattern_timeout_ms),
            register_timeout_ms: get_or(m, "register_timeout_ms", d.register_timeout_ms),
            backend_timeout_ms: get_or(m, "backend_timeout_ms", d.backend_timeout_ms),
            reset_phrase: get_or(m, "reset_phrase", d.reset_phrase),
            register_cache_token: get_or(m, "register_cache_token", d.register_cache_token),
            handoff_markers: get_list_or(m, "handoff_markers", d.handoff_markers),
            reset_confirmation: get_or(m, "reset_confirmation", d.reset_confirmation),
            generic_confirmation: get_or(m, "generic_confirmation", d.generic_confirmation),
            register_confirmation: get_or(m, "register_confirmation", d.register_confirmation),
            register_not_found: get_or(m, "register_not_found", d.register_not_found),
            apology_rate_limited: get_or(m, "apology_rate_limited", d.apology_rate_limited),
            apology_content_filtered: get_or(m, "apology_content_filtered", d.apology_content_filtered),
            apology_generic: get_or(m, "apology_generic", d.apology_generic),
            model_max_tokens: get_or(m, "model_max_tokens", d.model_max_tokens),
            model_temperature: get_or(m, "model_temperature", d.model_temperature),
            cache_url: get_or(m, "cache_url", d.cache_url),
            pattern_url: get_or(m, "pattern_url", d.pattern_url),
            register_url: get_or(m, "register_url", d.register_url),
            home_base_url: get_or(m, "home_base_url", d.home_base_url),
            automations_path: get_or(m, "automations_path", d.automations_path),
            status_channel_capacity: get_or(m, "status_channel_capacity", d.status_channel_capacity),
        }
    }

    fn to_entries(&self) -> Vec<(&str, String, &str)> {
        vec![
            ("default_speaker", self.default_speaker.clone(), "Speaker id used when the utterance names none"),
            ("history_trigger_limit", self.history_trigger_limit.to_string(), "Conversation length that triggers turn-aligned trimming"),
            ("promote_window", self.promote_window.to_string(), "Messages scanned backwards when registering a cache entry"),
            ("cache_timeout_ms", self.cache_timeout_ms.to_string(), "Cache lookup timeout ms"),
            ("pattern_timeout_ms", self.pattern_timeout_ms.to_string(), "Pattern lookup timeout ms"),
            ("register_timeout_ms", self.register_timeout_ms.to_string(), "Cache registration timeout ms"),
            ("backend_timeout_ms", self.backend_timeout_ms.to_string(), "Home backend request timeout ms"),
            ("reset_phrase", self.reset_phrase.clone(), "Utterance that clears the speaker's conversation"),
            ("register_cache_token", self.register_cache_token.clone(), "Cached-reply token that promotes the previous command"),
            ("handoff_markers", self.handoff_markers.join(","), "Comma-separated reply markers that hand the turn off"),
            ("reset_confirmation", self.reset_confirmation.clone(), "Reply after a conversation reset"),
            ("generic_confirmation", self.generic_confirmation.clone(), "Reply when several actions ran or the model said nothing"),
            ("register_confirmation", self.register_confirmation.clone(), "Reply after a cache registration"),
            ("register_not_found", self.register_not_found.clone(), "Reply when no previous command can be registered"),
            ("apology_rate_limited", self.apology_rate_limited.clone(), "Apology for model rate limiting"),
            ("apology_content_filtered", self.apology_content_filtered.clone(), "Apology for model content filtering"),
            ("apology_generic", self.apology_generic.clone(), "Apology for any other failure"),
            ("model_max_tokens", self.model_max_tokens.to_string(), "Model completion token limit"),
            ("model_temperature", self.model_temperature.to_string(), "Model sampling temperature"),
            ("cache_url", self.cache_url.clone(), "Cache lookup endpoint"),
            ("pattern_url", self.pattern_url.clone(), "Speaker pattern endpoint"),
            ("register_url", self.register_url.clone(), "Cache registration endpoint"),
            ("home_base_url", self.home_base_url.clone(), "Home Assistant base URL"),
            ("automations_path", self.automations_path.clone(), "Automations YAML file"),
            ("status_channel_capacity", self.status_channel_capacity.to_string(), "Speaker status channel buffer"),
        ]
    }
}

/// Strip the `HEARTH_` prefix and lowercase keys.
fn env_map(vars: impl Iterator<Item = (String, String)>) -> HashMap<String, String> {
    vars.filter_map(|(k, v)| {
        k.strip_prefix(ENV_PREFIX)
            .map(|key| (key.to_lowercase(), v))
    })
    .collect()
}

fn get_or<T: std::str::FromStr>(map: &HashMap<String, String>, key: &str, default: T) -> T {
    map.get(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn get_list_or(map: &HashMap<String, String>, key: &str, default: Vec<String>) -> Vec<String> {
    match map.get(key) {
        Some(v) => v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = HearthCfg::default();
        assert_eq!(cfg.history_trigger_limit, 20);
        assert_eq!(cfg.promote_window, 4);
        assert_eq!(cfg.handoff_markers.len(), 2);
    }

    #[test]
    fn from_map_overrides_and_ignores_garbage() {
        let mut m = HashMap::new();
        m.insert("promote_window".to_string(), "6".to_string());
        m.insert("history_trigger_limit".to_string(), "not-a-number".to_string());
        m.insert("handoff_markers".to_string(), "cast_flag, ,tv_flag".to_string());
        let cfg = HearthCfg::from_map(&m);
        assert_eq!(cfg.promote_window, 6);
        assert_eq!(cfg.history_trigger_limit, 20);
        assert_eq!(cfg.handoff_markers, vec!["cast_flag", "tv_flag"]);
    }

    #[test]
    fn zero_trigger_limit_is_clamped() {
        let mut m = HashMap::new();
        m.insert("history_trigger_limit".to_string(), "0".to_string());
        assert_eq!(HearthCfg::from_map(&m).history_trigger_limit, 1);
    }

    #[test]
    fn entries_round_trip_through_map() {
        let mut cfg = HearthCfg::default();
        cfg.reset_phrase = "start over".into();
        cfg.model_temperature = 0.5;
        let map: HashMap<String, String> = cfg
            .to_entries()
            .into_iter()
            .map(|(k, v, _)| (k.to_string(), v))
            .collect();
        let back = HearthCfg::from_map(&map);
        assert_eq!(back.reset_phrase, "start over");
        assert_eq!(back.model_temperature, 0.5);
        assert_eq!(back.handoff_markers, cfg.handoff_markers);
    }

    #[test]
    fn env_map_strips_prefix() {
        let vars = vec![
            ("HEARTH_PROMOTE_WINDOW".to_string(), "3".to_string()),
            ("PATH".to_string(), "/usr/bin".to_string()),
        ];
        let map = env_map(vars.into_iter());
        assert_eq!(map.get("promote_window").map(String::as_str), Some("3"));
        assert!(!map.contains_key("path"));
    }
}
