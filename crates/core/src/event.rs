//! Canonical stream events.
//!
//! Every provider's wire stream is normalized into this one sequence. Order
//! within a response is significant: text and tool-call events arrive in the
//! order the model produced them, every `ToolCallEnd` precedes the `Stop`,
//! and exactly one terminal event ends the sequence.

use serde::{Deserialize, Serialize};

use crate::provider::Usage;
use crate::tool::ToolCall;

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model finished its answer
    EndTurn,
    /// The model is waiting for tool results
    ToolUse,
    /// Output hit the token limit
    MaxTokens,
    /// Output was blocked or cut by a safety filter
    ContentFilter,
    /// The provider reported a reason we do not recognize
    Error,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::EndTurn => "end_turn",
            Self::ToolUse => "tool_use",
            Self::MaxTokens => "max_tokens",
            Self::ContentFilter => "content_filter",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Which layer an `error` event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamErrorKind {
    /// Malformed, unsupported or unroutable request or wire data
    Protocol,
    /// Network, HTTP status or in-band provider failure
    Transport,
}

/// One event of a normalized response stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A piece of assistant text.
    TextDelta { text: String },

    /// The model began a tool call.
    ToolCallStart { id: String, name: String },

    /// A fragment of a tool call's argument text.
    ToolCallDelta { id: String, fragment: String },

    /// A tool call with finalized arguments.
    ToolCallEnd { call: ToolCall },

    /// Token accounting for the response.
    Usage(Usage),

    /// The response ended. `raw` keeps the provider's own reason string.
    Stop {
        reason: StopReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raw: Option<String>,
    },

    /// A problem in the stream. Terminal only when `fatal` is set;
    /// `recoverable` tells the caller whether re-issuing the request may help.
    Error {
        kind: StreamErrorKind,
        message: String,
        fatal: bool,
        recoverable: bool,
    },

    /// The caller canceled the request.
    Canceled,
}

impl StreamEvent {
    /// A non-fatal diagnostic.
    pub fn warning(kind: StreamErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            kind,
            message: message.into(),
            fatal: false,
            recoverable: false,
        }
    }

    /// A terminal error.
    pub fn fatal(kind: StreamErrorKind, message: impl Into<String>, recoverable: bool) -> Self {
        Self::Error {
            kind,
            message: message.into(),
            fatal: true,
            recoverable,
        }
    }

    /// `Stop`, a fatal `Error`, or `Canceled`.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Stop { .. } | Self::Canceled => true,
            Self::Error { fatal, .. } => *fatal,
            _ => false,
        }
    }

    /// Whether delivering this event commits the request: once a
    /// content-bearing event has been seen, a failure is never retried.
    pub fn is_content(&self) -> bool {
        matches!(
            self,
            Self::TextDelta { .. }
                | Self::ToolCallStart { .. }
                | Self::ToolCallDelta { .. }
                | Self::ToolCallEnd { .. }
        )
    }

    /// Wire name of this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TextDelta { .. } => "text_delta",
            Self::ToolCallStart { .. } => "tool_call_start",
            Self::ToolCallDelta { .. } => "tool_call_delta",
            Self::ToolCallEnd { .. } => "tool_call_end",
            Self::Usage(_) => "usage",
            Self::Stop { .. } => "stop",
            Self::Error { .. } => "error",
            Self::Canceled => "canceled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn terminal_classification() {
        assert!(StreamEvent::Stop { reason: StopReason::EndTurn, raw: None }.is_terminal());
        assert!(StreamEvent::Canceled.is_terminal());
        assert!(StreamEvent::fatal(StreamErrorKind::Transport, "reset", true).is_terminal());
        assert!(!StreamEvent::warning(StreamErrorKind::Protocol, "bad chunk").is_terminal());
        assert!(!StreamEvent::Usage(Usage::new(1, 2)).is_terminal());
    }

    #[test]
    fn content_classification() {
        assert!(StreamEvent::TextDelta { text: "hi".into() }.is_content());
        assert!(
            StreamEvent::ToolCallStart { id: "a".into(), name: "b".into() }.is_content()
        );
        assert!(!StreamEvent::Usage(Usage::default()).is_content());
        assert!(!StreamEvent::warning(StreamErrorKind::Protocol, "x").is_content());
    }

    #[test]
    fn event_serialization_uses_type_tag() {
        let event = StreamEvent::Stop {
            reason: StopReason::ToolUse,
            raw: Some("tool_calls".into()),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value, json!({"type": "stop", "reason": "tool_use", "raw": "tool_calls"}));

        let usage = serde_json::to_value(StreamEvent::Usage(Usage::new(3, 4))).unwrap();
        assert_eq!(usage["type"], "usage");
        assert_eq!(usage["total_tokens"], 7);
    }

    #[test]
    fn event_deserialization() {
        let json = r#"{"type":"tool_call_end","call":{"id":"c1","name":"calc","arguments":{"x":1}}}"#;
        match serde_json::from_str::<StreamEvent>(json).unwrap() {
            StreamEvent::ToolCallEnd { call } => {
                assert_eq!(call.id, "c1");
                assert_eq!(call.arguments["x"], 1);
            }
            other => panic!("Wrong variant: {other:?}"),
        }
    }

    #[test]
    fn event_type_names() {
        assert_eq!(StreamEvent::Canceled.event_type(), "canceled");
        assert_eq!(
            StreamEvent::ToolCallDelta { id: "a".into(), fragment: "{".into() }.event_type(),
            "tool_call_delta"
        );
    }
}
