use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

pub const ENV_BACKEND_URL: &str = "CREWDECK_BACKEND_URL";
pub const ENV_ANON_KEY: &str = "CREWDECK_ANON_KEY";
pub const ENV_REPLY_DELAY_MS: &str = "CREWDECK_REPLY_DELAY_MS";
pub const ENV_LOG: &str = "CREWDECK_LOG";
pub const ENV_COMPLETION_API_KEY: &str = "CREWDECK_COMPLETION_API_KEY";

const DEFAULT_REPLY_DELAY_MS: u64 = 1000;
const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub url: String,
    pub anon_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponderKind {
    Echo,
    Completion,
}

/// OpenAI-compatible chat completion endpoint used for agent replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionConfig {
    pub base_url: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_reply_delay_ms")]
    pub reply_delay_ms: u64,
    #[serde(default = "default_responder")]
    pub responder: ResponderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion: Option<CompletionConfig>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            reply_delay_ms: default_reply_delay_ms(),
            responder: default_responder(),
            completion: None,
        }
    }
}

impl ChatConfig {
    pub fn reply_delay(&self) -> Duration {
        Duration::from_millis(self.reply_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub backend: BackendConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    /// Applied to every HTTP request when set; requests never time out otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_reply_delay_ms() -> u64 {
    DEFAULT_REPLY_DELAY_MS
}

fn default_responder() -> ResponderKind {
    ResponderKind::Echo
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

impl ClientConfig {
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            backend: BackendConfig {
                url: url.into(),
                anon_key: anon_key.into(),
            },
            chat: ChatConfig::default(),
            request_timeout_ms: None,
            log_filter: default_log_filter(),
        }
    }

    /// Reads a JSON config file, then applies environment overrides.
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        let mut config = Self::from_file(path)?;
        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parses the JSON file only; no environment overrides, no validation.
    pub fn from_file(path: &Path) -> Result<Self, SyncError> {
        let raw = fs::read_to_string(path).map_err(|err| {
            SyncError::Config(format!(
                "unable to read config {}: {err}",
                path.to_string_lossy()
            ))
        })?;
        serde_json::from_str::<ClientConfig>(&raw).map_err(|err| {
            SyncError::Config(format!(
                "invalid config {}: {err}",
                path.to_string_lossy()
            ))
        })
    }

    /// Builds a config purely from environment variables.
    pub fn from_env() -> Result<Self, SyncError> {
        let mut config = Self::new(String::new(), String::new());
        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = non_empty(lookup(ENV_BACKEND_URL)) {
            self.backend.url = url;
        }
        if let Some(anon_key) = non_empty(lookup(ENV_ANON_KEY)) {
            self.backend.anon_key = anon_key;
        }
        if let Some(delay) =
            non_empty(lookup(ENV_REPLY_DELAY_MS)).and_then(|value| value.parse::<u64>().ok())
        {
            self.chat.reply_delay_ms = delay;
        }
        if let Some(filter) = non_empty(lookup(ENV_LOG)) {
            self.log_filter = filter;
        }
        if let Some(api_key) = non_empty(lookup(ENV_COMPLETION_API_KEY)) {
            if let Some(completion) = self.chat.completion.as_mut() {
                completion.api_key = Some(api_key);
            }
        }
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        let url = self.backend.url.trim();
        if url.is_empty() {
            return Err(SyncError::Config(format!(
                "backend url is missing; set it in the config file or {ENV_BACKEND_URL}"
            )));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(SyncError::Config(format!(
                "backend url must be http(s): {url}"
            )));
        }
        if self.backend.anon_key.trim().is_empty() {
            return Err(SyncError::Config(format!(
                "backend anon key is missing; set it in the config file or {ENV_ANON_KEY}"
            )));
        }
        if self.chat.responder == ResponderKind::Completion {
            let Some(completion) = self.chat.completion.as_ref() else {
                return Err(SyncError::Config(
                    "completion responder selected without a completion section".to_string(),
                ));
            };
            if completion.base_url.trim().is_empty() || completion.model.trim().is_empty() {
                return Err(SyncError::Config(
                    "completion responder needs both base_url and model".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn minimal_config_gets_defaults() {
        let config = serde_json::from_str::<ClientConfig>(
            r#"{ "backend": { "url": "https://demo.example.co", "anon_key": "anon" } }"#,
        )
        .expect("minimal config should parse");

        assert_eq!(config.chat.reply_delay_ms, 1000);
        assert_eq!(config.chat.responder, ResponderKind::Echo);
        assert_eq!(config.log_filter, "info");
        assert_eq!(config.request_timeout(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn environment_overrides_win_over_file_values() {
        let mut config = ClientConfig::new("https://file.example.co", "file-key");
        let env = HashMap::from([
            (ENV_BACKEND_URL, "https://env.example.co"),
            (ENV_REPLY_DELAY_MS, "25"),
            (ENV_ANON_KEY, "   "),
        ]);
        config.apply_overrides(|name| env.get(name).map(|value| value.to_string()));

        assert_eq!(config.backend.url, "https://env.example.co");
        assert_eq!(config.backend.anon_key, "file-key");
        assert_eq!(config.chat.reply_delay(), Duration::from_millis(25));
    }

    #[test]
    fn validate_rejects_incomplete_configs() {
        assert!(ClientConfig::new("", "anon").validate().is_err());
        assert!(ClientConfig::new("ftp://example", "anon").validate().is_err());
        assert!(ClientConfig::new("https://example", "").validate().is_err());

        let mut completion = ClientConfig::new("https://example", "anon");
        completion.chat.responder = ResponderKind::Completion;
        assert!(completion.validate().is_err());
        completion.chat.completion = Some(CompletionConfig {
            base_url: "http://localhost:1234/v1".to_string(),
            model: "local-model".to_string(),
            api_key: None,
            system_prompt: None,
            temperature: None,
            max_tokens: None,
        });
        assert!(completion.validate().is_ok());
    }

    #[test]
    fn from_file_reads_json_without_env() {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time should move forward")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("crewdeck-config-{timestamp}.json"));
        fs::write(
            &path,
            r#"{
                "backend": { "url": "https://demo.example.co", "anon_key": "anon" },
                "chat": { "reply_delay_ms": 5 },
                "request_timeout_ms": 15000
            }"#,
        )
        .expect("config file should be written");

        let mut config = ClientConfig::from_file(&path).expect("config should parse");
        config.apply_overrides(|_| None);
        config.validate().expect("config should be valid");
        assert_eq!(config.backend.url, "https://demo.example.co");
        assert_eq!(config.chat.reply_delay_ms, 5);
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(15)));

        config.apply_overrides(|name| (name == ENV_REPLY_DELAY_MS).then(|| "250".to_string()));
        assert_eq!(config.chat.reply_delay_ms, 250);
        assert_eq!(config.backend.url, "https://demo.example.co");

        let _ = fs::remove_file(path);
    }
}
