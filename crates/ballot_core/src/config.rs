use std::{collections::HashMap, fs, path::Path, time::Duration};

use anyhow::{Context, Result};
use url::Url;

pub const SETTINGS_FILE: &str = "ballot.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub api_url: String,
    pub round_id: u32,
    pub local_store_url: String,
    pub allocation_debounce_ms: u64,
    pub budget_debounce_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8080".into(),
            round_id: 5,
            local_store_url: "sqlite://./data/ballot.db".into(),
            allocation_debounce_ms: 200,
            budget_debounce_ms: 300,
        }
    }
}

impl Settings {
    pub fn allocation_debounce(&self) -> Duration {
        Duration::from_millis(self.allocation_debounce_ms)
    }

    pub fn budget_debounce(&self) -> Duration {
        Duration::from_millis(self.budget_debounce_ms)
    }

    pub fn api_base(&self) -> Result<Url> {
        Url::parse(&self.api_url).with_context(|| format!("invalid api url '{}'", self.api_url))
    }
}

pub fn load_settings() -> Settings {
    load_settings_from(Path::new(SETTINGS_FILE), |key| std::env::var(key).ok())
}

/// Defaults, then `path` if it parses, then the environment as seen by `env`.
pub fn load_settings_from(path: &Path, env: impl Fn(&str) -> Option<String>) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, toml::Value>>(&raw) {
            if let Some(v) = file_cfg.get("api_url").and_then(toml::Value::as_str) {
                settings.api_url = v.to_string();
            }
            if let Some(v) = file_cfg
                .get("round_id")
                .and_then(as_u64)
                .and_then(|v| u32::try_from(v).ok())
            {
                settings.round_id = v;
            }
            if let Some(v) = file_cfg.get("local_store_url").and_then(toml::Value::as_str) {
                settings.local_store_url = normalize_store_url(v);
            }
            if let Some(v) = file_cfg.get("allocation_debounce_ms").and_then(as_u64) {
                settings.allocation_debounce_ms = v;
            }
            if let Some(v) = file_cfg.get("budget_debounce_ms").and_then(as_u64) {
                settings.budget_debounce_ms = v;
            }
        }
    }

    if let Some(v) = env("BALLOT_API_URL") {
        settings.api_url = v;
    }
    if let Some(v) = env("APP__API_URL") {
        settings.api_url = v;
    }

    if let Some(v) = env("BALLOT_ROUND_ID").and_then(|v| v.parse().ok()) {
        settings.round_id = v;
    }
    if let Some(v) = env("APP__ROUND_ID").and_then(|v| v.parse().ok()) {
        settings.round_id = v;
    }

    if let Some(v) = env("APP__LOCAL_STORE_URL") {
        settings.local_store_url = normalize_store_url(&v);
    }

    if let Some(v) = env("APP__ALLOCATION_DEBOUNCE_MS").and_then(|v| v.parse().ok()) {
        settings.allocation_debounce_ms = v;
    }
    if let Some(v) = env("APP__BUDGET_DEBOUNCE_MS").and_then(|v| v.parse().ok()) {
        settings.budget_debounce_ms = v;
    }

    settings
}

fn as_u64(value: &toml::Value) -> Option<u64> {
    match value {
        toml::Value::Integer(v) => u64::try_from(*v).ok(),
        toml::Value::String(v) => v.parse().ok(),
        _ => None,
    }
}

/// Accepts a bare file path as well as a sqlite url.
pub fn normalize_store_url(raw: &str) -> String {
    let raw = raw.trim();

    if raw.is_empty() {
        return Settings::default().local_store_url;
    }

    if raw.starts_with("sqlite::memory:") || raw.contains("://") {
        return raw.to_string();
    }

    if let Some(path) = raw.strip_prefix("sqlite:") {
        return format!("sqlite://{}", path.replace('\\', "/"));
    }

    format!("sqlite://{}", raw.replace('\\', "/"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
