use std::{fs, path::Path, time::Duration};

use client_core::{
    transport::{DEFAULT_API_BASE_URL, DEFAULT_REQUEST_TIMEOUT},
    RetryPolicy,
};
use serde::Deserialize;
use tracing::warn;

const SETTINGS_FILE: &str = "panel.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub api_base_url: String,
    pub database_url: String,
    pub request_timeout_secs: u64,
    pub cursor_retry_attempts: u32,
    pub cursor_retry_delay_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            api_base_url: DEFAULT_API_BASE_URL.into(),
            database_url: "sqlite://./data/panel.db".into(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
            cursor_retry_attempts: retry.max_attempts,
            cursor_retry_delay_ms: u64::try_from(retry.base_delay.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

impl Settings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.cursor_retry_attempts.max(1),
            base_delay: Duration::from_millis(self.cursor_retry_delay_ms),
        }
    }
}

/// Keys accepted in `panel.toml`.
#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    api_base_url: Option<String>,
    database_url: Option<String>,
    request_timeout_secs: Option<u64>,
    cursor_retry_attempts: Option<u32>,
    cursor_retry_delay_ms: Option<u64>,
}

pub fn load_settings() -> Settings {
    load_settings_from(Path::new(SETTINGS_FILE), |key| std::env::var(key).ok())
}

fn load_settings_from(path: &Path, env: impl Fn(&str) -> Option<String>) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<FileSettings>(&raw) {
            Ok(file_cfg) => {
                if let Some(v) = file_cfg.api_base_url {
                    settings.api_base_url = v;
                }
                if let Some(v) = file_cfg.database_url {
                    settings.database_url = v;
                }
                if let Some(v) = file_cfg.request_timeout_secs {
                    settings.request_timeout_secs = v;
                }
                if let Some(v) = file_cfg.cursor_retry_attempts {
                    settings.cursor_retry_attempts = v;
                }
                if let Some(v) = file_cfg.cursor_retry_delay_ms {
                    settings.cursor_retry_delay_ms = v;
                }
            }
            Err(err) => warn!("config: ignoring {}: {err}", path.display()),
        }
    }

    if let Some(v) = env("PANEL_API_BASE_URL") {
        settings.api_base_url = v;
    }
    if let Some(v) = env("APP__API_BASE_URL") {
        settings.api_base_url = v;
    }

    if let Some(v) = env("PANEL_DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = env("APP__DATABASE_URL") {
        settings.database_url = v;
    }

    if let Some(v) = env("APP__REQUEST_TIMEOUT_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.request_timeout_secs = parsed;
        }
    }
    if let Some(v) = env("APP__CURSOR_RETRY_ATTEMPTS") {
        if let Ok(parsed) = v.parse::<u32>() {
            settings.cursor_retry_attempts = parsed;
        }
    }
    if let Some(v) = env("APP__CURSOR_RETRY_DELAY_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.cursor_retry_delay_ms = parsed;
        }
    }

    settings
}

/// Turns a plain file path into a `sqlite://` url; other urls pass through.
pub fn prepare_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}
