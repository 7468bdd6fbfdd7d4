//! Configuration loading, validation, and management for WebPilot.
//!
//! Loads configuration from `~/.webpilot/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use webpilot_core::ValidationRules;

/// Upper bound for `agent.max_wait_secs` (one hour).
pub const MAX_WAIT_SECS: f64 = 3600.0;

/// Environment variables consulted for per-provider credentials.
pub const PROVIDER_KEY_VARS: &[(&str, &str)] = &[
    ("openai", "OPENAI_API_KEY"),
    ("anthropic", "ANTHROPIC_API_KEY"),
    ("gemini", "GEMINI_API_KEY"),
    ("openrouter", "OPENROUTER_API_KEY"),
];

/// The root configuration structure.
///
/// Maps directly to `~/.webpilot/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Fallback API key for any provider without its own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default model as `provider:model`, or a bare model id
    #[serde(default = "default_model")]
    pub default_model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max tokens per model reply
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Stream replies when the provider supports it
    #[serde(default = "default_true")]
    pub streaming: bool,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub browser: BrowserConfig,

    #[serde(default)]
    pub history: HistoryConfig,
}

fn default_model() -> String {
    "openai:gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.0
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_true() -> bool {
    true
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_model", &self.default_model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("streaming", &self.streaming)
            .field("providers", &self.providers)
            .field("agent", &self.agent)
            .field("browser", &self.browser)
            .field("history", &self.history)
            .finish()
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Override the backend's base endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Models this provider may serve. Empty = any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<String>,

    /// Force streaming on or off for this provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streaming: Option<bool>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("models", &self.models)
            .field("streaming", &self.streaming)
            .finish()
    }
}

/// Task loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Upper bound on loop iterations for one task
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Cap on a single `waiting(seconds)` action
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: f64,

    /// Characters of DOM snapshot included in one prompt.
    ///
    /// Snapshots up to this size are sent whole; longer ones are cut and end
    /// with a `[snapshot truncated: showing N of M characters]` marker.
    #[serde(default = "default_snapshot_char_budget")]
    pub snapshot_char_budget: usize,

    /// Progress units a task must reach to count as a success
    #[serde(default = "default_total")]
    pub total: u32,

    #[serde(default = "default_task_type")]
    pub task_type: String,

    #[serde(default)]
    pub validation: ValidationRules,
}

fn default_max_steps() -> u32 {
    50
}
fn default_max_wait_secs() -> f64 {
    30.0
}
fn default_snapshot_char_budget() -> usize {
    200_000
}
fn default_total() -> u32 {
    1
}
fn default_task_type() -> String {
    "single".into()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_wait_secs: default_max_wait_secs(),
            snapshot_char_budget: default_snapshot_char_budget(),
            total: default_total(),
            task_type: default_task_type(),
            validation: ValidationRules::default(),
        }
    }
}

/// Page timing and launch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Upper bound on the stability wait before proceeding anyway
    #[serde(default = "default_stability_timeout_ms")]
    pub stability_timeout_ms: u64,

    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,

    /// Extra delay after the page reports ready
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// Delay between a scroll and the re-measure that follows it
    #[serde(default = "default_scroll_settle_ms")]
    pub scroll_settle_ms: u64,

    #[serde(default = "default_true")]
    pub headless: bool,

    /// Page opened before the first step when `--url` is not given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_url: Option<String>,
}

fn default_stability_timeout_ms() -> u64 {
    10_000
}
fn default_poll_ms() -> u64 {
    100
}
fn default_settle_ms() -> u64 {
    500
}
fn default_scroll_settle_ms() -> u64 {
    150
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            stability_timeout_ms: default_stability_timeout_ms(),
            poll_ms: default_poll_ms(),
            settle_ms: default_settle_ms(),
            scroll_settle_ms: default_scroll_settle_ms(),
            headless: true,
            start_url: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Where chat files live. Defaults to `~/.webpilot/history`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl HistoryConfig {
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("history"))
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.webpilot/config.toml).
    ///
    /// Environment overrides, highest priority first:
    /// - `WEBPILOT_MODEL` replaces `default_model`
    /// - `WEBPILOT_API_KEY` replaces the fallback `api_key`
    /// - `OPENAI_API_KEY`, `ANTHROPIC_API_KEY`, `GEMINI_API_KEY`,
    ///   `OPENROUTER_API_KEY` fill in provider keys the file leaves empty
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::config_path())?;
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(model) = non_empty("WEBPILOT_MODEL") {
            self.default_model = model;
        }
        if let Some(key) = non_empty("WEBPILOT_API_KEY") {
            self.api_key = Some(key);
        }
        for (provider, var) in PROVIDER_KEY_VARS {
            if let Some(key) = non_empty(var) {
                let entry = self.providers.entry((*provider).to_string()).or_default();
                if entry.api_key.is_none() {
                    entry.api_key = Some(key);
                }
            }
        }
    }

    pub fn config_dir() -> PathBuf {
        dirs_home().join(".webpilot")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::ValidationError("max_tokens must be > 0".into()));
        }
        if self.agent.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_steps must be > 0".into(),
            ));
        }
        if !(0.0..=MAX_WAIT_SECS).contains(&self.agent.max_wait_secs) {
            return Err(ConfigError::ValidationError(format!(
                "agent.max_wait_secs must be between 0 and {MAX_WAIT_SECS}"
            )));
        }
        if self.agent.snapshot_char_budget == 0 {
            return Err(ConfigError::ValidationError(
                "agent.snapshot_char_budget must be > 0".into(),
            ));
        }
        if self.browser.poll_ms == 0 {
            return Err(ConfigError::ValidationError(
                "browser.poll_ms must be > 0".into(),
            ));
        }
        if self.browser.stability_timeout_ms < self.browser.poll_ms {
            return Err(ConfigError::ValidationError(
                "browser.stability_timeout_ms must be at least browser.poll_ms".into(),
            ));
        }
        for (id, provider) in &self.providers {
            if let Some(url) = &provider.api_url {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(ConfigError::ValidationError(format!(
                        "providers.{id}.api_url must be an http(s) URL"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Credential for `provider_id`: its own key, else the fallback key.
    pub fn credential_for(&self, provider_id: &str) -> Option<String> {
        self.providers
            .get(provider_id)
            .and_then(|p| p.api_key.clone())
            .or_else(|| self.api_key.clone())
            .filter(|k| !k.trim().is_empty())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            streaming: true,
            providers: HashMap::new(),
            agent: AgentConfig::default(),
            browser: BrowserConfig::default(),
            history: HistoryConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert_eq!(config.default_model, "openai:gpt-4o-mini");
        assert_eq!(config.agent.max_steps, 50);
        assert!(config.streaming);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.default_model, config.default_model);
        assert_eq!(parsed.browser.settle_ms, config.browser.settle_ms);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn default_snapshot_budget_fits_large_pages() {
        let config = AppConfig::default();
        assert_eq!(config.agent.snapshot_char_budget, 200_000);
        assert!(AppConfig::default_toml().contains("snapshot_char_budget = 200000"));
    }

    #[test]
    fn max_wait_secs_is_bounded() {
        let mut config = AppConfig::default();
        config.agent.max_wait_secs = 1e20;
        assert!(config.validate().is_err());
        config.agent.max_wait_secs = f64::NAN;
        assert!(config.validate().is_err());
        config.agent.max_wait_secs = -1.0;
        assert!(config.validate().is_err());
        config.agent.max_wait_secs = MAX_WAIT_SECS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_max_steps_rejected() {
        let mut config = AppConfig::default();
        config.agent.max_steps = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn non_http_api_url_rejected() {
        let mut config = AppConfig::default();
        config.providers.insert(
            "ollama".into(),
            ProviderConfig {
                api_url: Some("localhost:11434".into()),
                ..ProviderConfig::default()
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.default_model, "openai:gpt-4o-mini");
    }

    #[test]
    fn load_from_file_with_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
default_model = "anthropic:claude-sonnet-4-20250514"
streaming = false

[providers.anthropic]
api_key = "sk-ant-test"
models = ["claude-sonnet-4-20250514"]

[agent]
max_steps = 12
total = 3

[agent.validation]
success_indicators = ["results for"]
failure_indicators = ["no results"]

[browser]
settle_ms = 50
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.default_model, "anthropic:claude-sonnet-4-20250514");
        assert!(!config.streaming);
        assert_eq!(config.agent.max_steps, 12);
        assert_eq!(config.agent.total, 3);
        assert_eq!(config.agent.validation.success_indicators, vec!["results for"]);
        assert_eq!(config.browser.settle_ms, 50);
        assert_eq!(config.browser.poll_ms, 100);
        assert_eq!(config.credential_for("anthropic").as_deref(), Some("sk-ant-test"));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "default_model = [").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = AppConfig::default();
        config.providers.insert(
            "openai".into(),
            ProviderConfig {
                api_key: Some("from-file".into()),
                ..ProviderConfig::default()
            },
        );
        config.apply_env(|name| match name {
            "WEBPILOT_MODEL" => Some("gemini:gemini-2.0-flash".into()),
            "OPENAI_API_KEY" => Some("from-env".into()),
            "GEMINI_API_KEY" => Some("gm-key".into()),
            "ANTHROPIC_API_KEY" => Some("   ".into()),
            _ => None,
        });
        assert_eq!(config.default_model, "gemini:gemini-2.0-flash");
        // File wins over the per-provider variable.
        assert_eq!(config.credential_for("openai").as_deref(), Some("from-file"));
        assert_eq!(config.credential_for("gemini").as_deref(), Some("gm-key"));
        assert!(config.credential_for("anthropic").is_none());
    }

    #[test]
    fn fallback_key_covers_unconfigured_providers() {
        let config = AppConfig {
            api_key: Some("shared".into()),
            ..AppConfig::default()
        };
        assert_eq!(config.credential_for("openrouter").as_deref(), Some("shared"));
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut config = AppConfig {
            api_key: Some("sk-secret".into()),
            ..AppConfig::default()
        };
        config.providers.insert(
            "openai".into(),
            ProviderConfig {
                api_key: Some("sk-other".into()),
                ..ProviderConfig::default()
            },
        );
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(!debug.contains("sk-other"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn history_dir_defaults_under_config_dir() {
        let dir = HistoryConfig::default().resolved_dir();
        assert!(dir.ends_with(".webpilot/history"));
    }
}
