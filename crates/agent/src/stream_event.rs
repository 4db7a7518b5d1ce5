//! Agent-level events.
//!
//! `AgentEvent` wraps provider-level stream events together with loop state
//! transitions and tool results, so a caller can render a run as it happens.

use serde::{Deserialize, Serialize};
use switchboard_core::{StreamEvent, ToolResult};

use crate::state::{AgentOutcome, LoopState};

/// Events emitted by the agent loop while it runs.
///
/// - `stream`        - a canonical stream event from the current model turn
/// - `state_changed` - the loop moved between states
/// - `tool_result`   - a tool call finished and its result was appended
/// - `finished`      - the run is over
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A canonical event from model turn `turn`.
    Stream { turn: u32, event: StreamEvent },

    /// The loop changed state.
    StateChanged { from: LoopState, to: LoopState },

    /// A tool call completed.
    ToolResult { name: String, result: ToolResult },

    /// The run ended.
    Finished { outcome: AgentOutcome },
}

impl AgentEvent {
    /// Event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Stream { .. } => "stream",
            Self::StateChanged { .. } => "state_changed",
            Self::ToolResult { .. } => "tool_result",
            Self::Finished { .. } => "finished",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Completion;
    use switchboard_core::Usage;

    #[test]
    fn event_serialization_stream() {
        let event = AgentEvent::Stream {
            turn: 1,
            event: StreamEvent::TextDelta { text: "Hello".into() },
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"stream""#));
        assert!(json.contains(r#""type":"text_delta""#));
        assert!(json.contains(r#""text":"Hello""#));
    }

    #[test]
    fn event_serialization_state_changed() {
        let event = AgentEvent::StateChanged {
            from: LoopState::AwaitingModel,
            to: LoopState::ToolsRequested,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"state_changed""#));
        assert!(json.contains(r#""state":"tools_requested""#));
    }

    #[test]
    fn event_serialization_tool_result() {
        let event = AgentEvent::ToolResult {
            name: "calculator".into(),
            result: ToolResult::success("call_1", serde_json::json!(4), 3),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"tool_result""#));
        assert!(json.contains(r#""call_id":"call_1""#));
    }

    #[test]
    fn event_serialization_finished() {
        let event = AgentEvent::Finished {
            outcome: AgentOutcome {
                state: LoopState::Done { completion: Completion::Clean },
                turns: 2,
                tool_calls_made: 1,
                usage: Usage::new(10, 20),
                text: "4".into(),
                partial: None,
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"finished""#));
        assert!(json.contains(r#""turns":2"#));
        assert!(!json.contains("partial"));
    }

    #[test]
    fn event_type_mapping() {
        assert_eq!(
            AgentEvent::StateChanged { from: LoopState::Idle, to: LoopState::AwaitingModel }.event_type(),
            "state_changed"
        );
        assert_eq!(
            AgentEvent::Stream { turn: 1, event: StreamEvent::Canceled }.event_type(),
            "stream"
        );
    }
}
