//! Reassembles adapter output into a well-formed canonical event sequence.
//!
//! Guarantees, per response:
//! - finalized arguments are exactly the concatenation of received fragments
//! - every `ToolCallEnd` precedes the `Stop`, open calls closing in start order
//! - exactly one terminal event; anything after it is dropped

use serde_json::Value;
use switchboard_core::{ProtocolError, StopReason, StreamErrorKind, StreamEvent, ToolCall};
use tracing::{trace, warn};

use crate::adapter::PartialEvent;

#[derive(Debug)]
struct OpenCall {
    id: String,
    name: String,
    arguments: String,
}

#[derive(Debug, Default)]
pub struct EventNormalizer {
    /// In-flight calls, in start order
    open: Vec<OpenCall>,
    /// Ids of calls already finalized in this response
    closed: Vec<String>,
    terminated: bool,
}

impl EventNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Forget everything; used before a retry attempt.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Feed one adapter event.
    pub fn accept(&mut self, event: PartialEvent) -> Vec<StreamEvent> {
        if self.terminated {
            trace!(?event, "Dropping event after terminal");
            return Vec::new();
        }

        match event {
            PartialEvent::TextDelta(text) if text.is_empty() => Vec::new(),
            PartialEvent::TextDelta(text) => vec![StreamEvent::TextDelta { text }],

            PartialEvent::ToolCallStart { id, name } => {
                if self.position(&id).is_some() || self.closed.contains(&id) {
                    return vec![protocol_warning(format!("duplicate start for tool call '{id}'"))];
                }
                self.open.push(OpenCall {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: String::new(),
                });
                vec![StreamEvent::ToolCallStart { id, name }]
            }

            PartialEvent::ToolCallDelta { id, fragment } => match self.position(&id) {
                Some(idx) => {
                    self.open[idx].arguments.push_str(&fragment);
                    vec![StreamEvent::ToolCallDelta { id, fragment }]
                }
                None => vec![protocol_warning(format!("delta for unknown tool call '{id}'"))],
            },

            PartialEvent::ToolCallEnd { id } => match self.position(&id) {
                Some(idx) => {
                    let call = self.open.remove(idx);
                    self.finalize(call)
                }
                None => vec![protocol_warning(format!("end for unknown tool call '{id}'"))],
            },

            PartialEvent::Usage(usage) => vec![StreamEvent::Usage(usage)],

            PartialEvent::Stop { reason, raw } => {
                let mut events = Vec::new();
                for call in std::mem::take(&mut self.open) {
                    events.extend(self.finalize(call));
                }
                let reason = if reason == StopReason::EndTurn && !self.closed.is_empty() {
                    StopReason::ToolUse
                } else {
                    reason
                };
                events.push(StreamEvent::Stop { reason, raw });
                self.terminated = true;
                events
            }

            PartialEvent::Malformed(reason) => {
                vec![StreamEvent::warning(StreamErrorKind::Protocol, reason)]
            },

            PartialEvent::ProviderFailure { message, retryable } => {
                self.terminate(StreamEvent::fatal(StreamErrorKind::Transport, message, retryable))
            }
        }
    }

    /// End the sequence with `event` unless it has already ended.
    pub fn terminate(&mut self, event: StreamEvent) -> Vec<StreamEvent> {
        if self.terminated {
            return Vec::new();
        }
        self.terminated = true;
        vec![event]
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.open.iter().position(|c| c.id == id)
    }

    fn finalize(&mut self, call: OpenCall) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let arguments = if call.arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str(&call.arguments) {
                Ok(value) => value,
                Err(e) => {
                    warn!(tool = %call.name, call_id = %call.id, error = %e, "Tool arguments are not valid JSON");
                    events.push(protocol_warning(format!(
                        "arguments for tool call '{}' are not valid JSON: {e}",
                        call.id
                    )));
                    Value::String(call.arguments)
                }
            }
        };
        self.closed.push(call.id.clone());
        events.push(StreamEvent::ToolCallEnd {
            call: ToolCall {
                id: call.id,
                name: call.name,
                arguments,
            },
        });
        events
    }
}

/// A non-fatal event for a stream that broke the event-order rules.
fn protocol_warning(message: String) -> StreamEvent {
    StreamEvent::warning(StreamErrorKind::Protocol, ProtocolError::Violation(message).to_string())
}
