//! Agent loop states and the outcome of a run.

use serde::{Deserialize, Serialize};
use switchboard_core::{ToolCall, Usage};

/// Where an agent run is.
///
/// `Idle → AwaitingModel → {TextTerminal → Done | ToolsRequested →
/// ExecutingTools → AwaitingModel}`, ending in `Done`, `Failed` or `Canceled`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    AwaitingModel,
    TextTerminal,
    ToolsRequested,
    ExecutingTools,
    Done { completion: Completion },
    Failed { reason: FailureReason },
    Canceled,
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Failed { .. } | Self::Canceled)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingModel => "awaiting_model",
            Self::TextTerminal => "text_terminal",
            Self::ToolsRequested => "tools_requested",
            Self::ExecutingTools => "executing_tools",
            Self::Done { .. } => "done",
            Self::Failed { .. } => "failed",
            Self::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Done { completion } => write!(f, "done({completion:?})"),
            Self::Failed { reason } => write!(f, "failed({reason})"),
            other => f.write_str(other.name()),
        }
    }
}

/// How a successful run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    /// The model finished its answer
    Clean,
    /// Output hit the token limit
    Truncated,
    /// Output was blocked by a content filter
    Filtered,
}

/// Why a run failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// Unusable model output, an unroutable request, or an unrecognized stop
    ProviderProtocol { message: String },
    /// The provider could not be reached or failed mid-stream
    Transport { message: String, recoverable: bool },
    /// The run used its turn budget without the model finishing
    MaxTurnsExceeded { limit: u32 },
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProviderProtocol { message } => write!(f, "provider protocol error: {message}"),
            Self::Transport { message, recoverable } => {
                write!(f, "transport error: {message}")?;
                if *recoverable {
                    f.write_str(" (recoverable)")?;
                }
                Ok(())
            }
            Self::MaxTurnsExceeded { limit } => write!(f, "exceeded {limit} turns"),
        }
    }
}

/// Assistant output of a turn that did not complete. Never appended to the
/// conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialOutput {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

impl PartialOutput {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.tool_calls.is_empty()
    }
}

/// Result of one agent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutcome {
    /// Terminal state
    pub state: LoopState,

    /// Model calls made
    pub turns: u32,

    /// Tool calls executed and appended
    pub tool_calls_made: usize,

    /// Token usage summed over every turn
    pub usage: Usage,

    /// Text of the last assistant message appended by this run
    pub text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial: Option<PartialOutput>,
}

impl AgentOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self.state, LoopState::Done { .. })
    }

    pub fn completion(&self) -> Option<Completion> {
        match &self.state {
            LoopState::Done { completion } => Some(*completion),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match &self.state {
            LoopState::Failed { reason } => Some(reason),
            _ => None,
        }
    }
}
