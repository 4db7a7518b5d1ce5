//! Provider-facing request types.
//!
//! A [`CanonicalRequest`] is what the agent loop hands to the client; a
//! [`ProviderConfig`] describes where and how a provider is reached. Neither
//! knows anything about a particular wire format.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::tool::ToolSpec;

/// The wire-protocol family a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// `/chat/completions` dialect: OpenAI, OpenRouter, Groq, vLLM, Ollama, ...
    #[serde(rename = "openai_compat", alias = "openai")]
    OpenAiCompat,
    /// Anthropic Messages API
    Anthropic,
    /// Google Generative Language API
    Google,
}

impl ProviderKind {
    pub fn default_endpoint(self) -> &'static str {
        match self {
            Self::OpenAiCompat => "https://api.openai.com/v1",
            Self::Anthropic => "https://api.anthropic.com",
            Self::Google => "https://generativelanguage.googleapis.com/v1beta",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::OpenAiCompat => "openai_compat",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
        };
        f.write_str(name)
    }
}

/// What a provider declares it can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub supports_tools: bool,
    pub supports_images: bool,
    /// Context window in tokens
    pub context_window: u32,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            supports_tools: true,
            supports_images: false,
            context_window: 128_000,
        }
    }
}

/// Static description of one configured provider. Read-only once built.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Routing name (e.g., "openai", "openrouter", "anthropic")
    pub name: String,

    pub kind: ProviderKind,

    /// Base URL without a trailing slash
    pub endpoint: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Extra headers sent with every request
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<(String, String)>,

    #[serde(default)]
    pub capabilities: Capabilities,
}

impl ProviderConfig {
    /// A provider at the kind's default endpoint.
    pub fn new(name: impl Into<String>, kind: ProviderKind) -> Self {
        Self {
            name: name.into(),
            kind,
            endpoint: kind.default_endpoint().to_string(),
            api_key: None,
            headers: Vec::new(),
            capabilities: Capabilities::default(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("headers", &self.headers.len())
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

/// Sampling parameters for a single call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Stop sequences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

/// Capabilities a request needs from whichever provider serves it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredCapabilities {
    pub tool_use: bool,
    pub image_input: bool,
}

impl RequiredCapabilities {
    /// The first requirement `capabilities` does not meet, if any.
    pub fn unmet_by(&self, capabilities: &Capabilities) -> Option<&'static str> {
        if self.tool_use && !capabilities.supports_tools {
            Some("tool use")
        } else if self.image_input && !capabilities.supports_images {
            Some("image input")
        } else {
            None
        }
    }
}

/// A provider-independent generation request. Immutable per call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalRequest {
    /// Target model, optionally prefixed with a provider name
    /// (e.g., "anthropic/claude-sonnet-4", "gpt-4o")
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    /// The conversation so far
    pub messages: Vec<Message>,

    /// Tools the model may call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,

    #[serde(default)]
    pub sampling: SamplingParams,

    #[serde(default)]
    pub requires: RequiredCapabilities,
}

impl CanonicalRequest {
    /// A request whose required capabilities are derived from its content.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        let requires = RequiredCapabilities {
            tool_use: false,
            image_input: messages.iter().any(Message::has_images),
        };
        Self {
            model: model.into(),
            system: None,
            messages,
            tools: Vec::new(),
            sampling: SamplingParams::default(),
            requires,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Attach tools; a non-empty set also requires tool support.
    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.requires.tool_use = !tools.is_empty();
        self.tools = tools;
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }
}

/// Bounds for retrying a request that failed before producing content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each further retry
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Never retry.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Add another turn's usage to a running total.
    pub fn accumulate(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}
