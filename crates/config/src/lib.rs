//! Configuration loading, validation, and management for Switchboard.
//!
//! Loads configuration from `~/.switchboard/config.toml` with environment
//! variable overrides. Validates all settings at startup and converts them
//! into the core types the client and agent loop are built from.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use switchboard_core::{Capabilities, ProviderConfig, ProviderKind, RetryPolicy, SamplingParams};

/// The root configuration structure.
///
/// Maps directly to `~/.switchboard/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Provider that serves models without a `provider/` prefix
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// System prompt sent with every request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Retry and backoff settings
    #[serde(default)]
    pub retry: RetryConfig,

    /// Agent loop settings
    #[serde(default)]
    pub agent: AgentSettings,

    /// Provider-specific configurations, keyed by routing name
    #[serde(default = "default_providers")]
    pub providers: BTreeMap<String, ProviderSettings>,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_true() -> bool {
    true
}

fn default_providers() -> BTreeMap<String, ProviderSettings> {
    let mut providers = BTreeMap::new();
    providers.insert(
        "openai".into(),
        ProviderSettings {
            supports_images: true,
            ..ProviderSettings::new(ProviderKind::OpenAiCompat)
        },
    );
    providers.insert(
        "anthropic".into(),
        ProviderSettings {
            supports_images: true,
            context_window: 200_000,
            ..ProviderSettings::new(ProviderKind::Anthropic)
        },
    );
    providers.insert(
        "google".into(),
        ProviderSettings {
            supports_images: true,
            context_window: 1_000_000,
            ..ProviderSettings::new(ProviderKind::Google)
        },
    );
    providers
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

/// One `[providers.<name>]` table.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub kind: ProviderKind,

    /// Base URL; the kind's public endpoint when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable to read the API key from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(default = "default_true")]
    pub supports_tools: bool,

    #[serde(default)]
    pub supports_images: bool,

    #[serde(default = "default_context_window")]
    pub context_window: u32,

    /// Extra headers sent with every request
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

fn default_context_window() -> u32 {
    128_000
}

impl ProviderSettings {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            api_url: None,
            api_key: None,
            api_key_env: None,
            headers: BTreeMap::new(),
            supports_tools: true,
            supports_images: false,
            context_window: default_context_window(),
        }
    }

    /// The variable consulted when no key is configured inline.
    pub fn key_variable(&self) -> &str {
        match &self.api_key_env {
            Some(var) => var,
            None => match self.kind {
                ProviderKind::OpenAiCompat => "OPENAI_API_KEY",
                ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
                ProviderKind::Google => "GEMINI_API_KEY",
            },
        }
    }

    /// Build the core provider description for `name`.
    pub fn to_provider_config(&self, name: &str) -> ProviderConfig {
        let mut config = ProviderConfig::new(name, self.kind).with_capabilities(Capabilities {
            supports_tools: self.supports_tools,
            supports_images: self.supports_images,
            context_window: self.context_window,
        });
        if let Some(url) = &self.api_url {
            config = config.with_endpoint(url);
        }
        if let Some(key) = &self.api_key {
            config = config.with_api_key(key);
        }
        for (header, value) in &self.headers {
            config = config.with_header(header, value);
        }
        config
    }
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("kind", &self.kind)
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("api_key_env", &self.api_key_env)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("supports_tools", &self.supports_tools)
            .field("supports_images", &self.supports_images)
            .field("context_window", &self.context_window)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per request, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Model calls allowed per run
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    /// Per-invocation tool timeout; 0 disables it
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

fn default_max_turns() -> u32 {
    50
}
fn default_tool_timeout_secs() -> u64 {
    120
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

impl AgentSettings {
    pub fn tool_timeout(&self) -> Option<Duration> {
        (self.tool_timeout_secs > 0).then(|| Duration::from_secs(self.tool_timeout_secs))
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.switchboard/config.toml).
    ///
    /// Environment overrides:
    /// - `SWITCHBOARD_PROVIDER` / `SWITCHBOARD_MODEL` replace the defaults
    /// - a provider without an inline key reads its `api_key_env`, or the
    ///   well-known variable for its kind (`OPENAI_API_KEY`,
    ///   `ANTHROPIC_API_KEY`, `GEMINI_API_KEY`)
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::read(&config_path)?;
        config.apply_env(|var| std::env::var(var).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(provider) = lookup("SWITCHBOARD_PROVIDER") {
            self.default_provider = provider;
        }
        if let Some(model) = lookup("SWITCHBOARD_MODEL") {
            self.default_model = model;
        }
        for (name, provider) in &mut self.providers {
            if provider.api_key.is_some() {
                continue;
            }
            if let Some(key) = lookup(provider.key_variable()) {
                tracing::debug!(provider = %name, var = provider.key_variable(), "API key taken from environment");
                provider.api_key = Some(key);
            }
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".switchboard")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.default_temperature) {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".into(),
            ));
        }

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::ValidationError(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".into(),
            ));
        }

        if self.agent.max_turns == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_turns must be at least 1".into(),
            ));
        }

        if !self.providers.contains_key(&self.default_provider) {
            return Err(ConfigError::ValidationError(format!(
                "default_provider '{}' is not configured under [providers]",
                self.default_provider
            )));
        }

        Ok(())
    }

    /// Core provider descriptions, in name order.
    pub fn provider_configs(&self) -> Vec<ProviderConfig> {
        self.providers
            .iter()
            .map(|(name, settings)| settings.to_provider_config(name))
            .collect()
    }

    pub fn sampling(&self) -> SamplingParams {
        SamplingParams {
            temperature: Some(self.default_temperature),
            max_tokens: Some(self.default_max_tokens),
            stop: Vec::new(),
        }
    }

    /// A copy safe to print: inline API keys are masked.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        for provider in config.providers.values_mut() {
            if provider.api_key.is_some() {
                provider.api_key = Some("[REDACTED]".into());
            }
        }
        config
    }

    /// Generate a default config TOML string (for the `config init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            system_prompt: None,
            retry: RetryConfig::default(),
            agent: AgentSettings::default(),
            providers: default_providers(),
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
