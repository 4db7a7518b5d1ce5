//! Error types for the Switchboard domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error type; the agent loop and the
//! client turn them into terminal states or events rather than panicking.

use std::time::Duration;
use thiserror::Error;

// --- Bounded context errors ---

/// Failures of the byte transport between the client and a provider.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Stream interrupted: {0}")]
    Interrupted(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Provider reported failure: {message}")]
    Provider { message: String, retryable: bool },
}

impl TransportError {
    /// Whether a fresh attempt of the same request may succeed.
    ///
    /// Only consulted while nothing content-bearing has reached the caller.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connect(_) | Self::RateLimited { .. } | Self::Interrupted(_) | Self::Timeout(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 408,
            Self::Provider { retryable, .. } => *retryable,
            Self::Authentication(_) => false,
        }
    }

    /// Server-requested delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Malformed, unsupported or unrecognized wire data. Never retried.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    #[error("Malformed chunk from {provider}: {reason}")]
    MalformedChunk { provider: String, reason: String },

    #[error("Unrecognized stop reason: {0}")]
    UnknownStopReason(String),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Provider '{provider}' does not support {capability}")]
    Unsupported { provider: String, capability: String },

    #[error("Request cannot be encoded: {0}")]
    Encode(String),

    #[error("{0}")]
    Violation(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Tool panicked: {0}")]
    Panicked(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}
