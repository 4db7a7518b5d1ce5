//! The adapter seam: one implementation per wire-protocol family.
//!
//! An adapter is stateless. It turns a [`CanonicalRequest`] into a
//! [`WireRequest`], and turns raw response bytes into [`PartialEvent`]s,
//! keeping everything it must remember between chunks in a [`DecodeState`]
//! owned by the caller.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use switchboard_core::{CanonicalRequest, ProtocolError, ProviderConfig, ProviderKind, StopReason, Usage};

use crate::anthropic::AnthropicAdapter;
use crate::google::GoogleAdapter;
use crate::openai::OpenAiAdapter;
use crate::sse::{SseBuffer, SseEvent};

/// A fully encoded HTTP request.
#[derive(Debug, Clone, PartialEq)]
pub struct WireRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

impl WireRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// What an adapter extracts from the wire, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum PartialEvent {
    TextDelta(String),
    ToolCallStart { id: String, name: String },
    ToolCallDelta { id: String, fragment: String },
    ToolCallEnd { id: String },
    Usage(Usage),
    Stop { reason: StopReason, raw: Option<String> },
    /// A chunk that could not be understood; it was dropped.
    Malformed(String),
    /// The provider reported an in-band failure.
    ProviderFailure { message: String, retryable: bool },
}

/// Per-response decoding state. Reset for every attempt.
#[derive(Debug, Default)]
pub struct DecodeState {
    pub(crate) sse: SseBuffer,
    /// Wire index to call id (OpenAI tool index, Anthropic block index)
    pub(crate) call_ids: HashMap<u32, String>,
    /// Stop seen on the wire but not yet released
    pub(crate) pending_stop: Option<(StopReason, String)>,
    pub(crate) saw_tool_call: bool,
    pub(crate) synthetic_ids: u32,
    pub(crate) prompt_tokens: u32,
    pub(crate) usage: Option<Usage>,
    /// A stop has been released; later bytes are ignored
    pub(crate) finished: bool,
}

impl DecodeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id for providers that do not identify their tool calls.
    pub(crate) fn synthesize_id(&mut self) -> String {
        let id = format!("call_{}", self.synthetic_ids);
        self.synthetic_ids += 1;
        id
    }
}

/// Encode/decode for one provider family.
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Build the wire request. `model` is the routed model name with any
    /// provider prefix already stripped.
    fn encode(
        &self,
        request: &CanonicalRequest,
        model: &str,
        provider: &ProviderConfig,
    ) -> Result<WireRequest, ProtocolError>;

    /// Handle one complete SSE event.
    fn decode_event(&self, event: SseEvent, state: &mut DecodeState, out: &mut Vec<PartialEvent>);

    /// Called once at transport end-of-stream, after buffered bytes are flushed.
    fn finish(&self, _state: &mut DecodeState, _out: &mut Vec<PartialEvent>) {}

    /// Feed a raw transport chunk.
    fn decode(&self, chunk: &[u8], state: &mut DecodeState) -> Vec<PartialEvent> {
        let mut out = Vec::new();
        for event in state.sse.push(chunk) {
            if state.finished {
                break;
            }
            tracing::trace!(provider = %self.kind(), data = %event.data, "SSE event");
            self.decode_event(event, state, &mut out);
        }
        out
    }

    /// Transport end-of-stream.
    fn flush(&self, state: &mut DecodeState) -> Vec<PartialEvent> {
        let mut out = Vec::new();
        if let Some(event) = state.sse.finish() {
            if !state.finished {
                self.decode_event(event, state, &mut out);
            }
        }
        if !state.finished {
            self.finish(state, &mut out);
        }
        out
    }
}

/// The adapter for a provider kind.
pub fn adapter_for(kind: ProviderKind) -> Arc<dyn ProviderAdapter> {
    match kind {
        ProviderKind::OpenAiCompat => Arc::new(OpenAiAdapter),
        ProviderKind::Anthropic => Arc::new(AnthropicAdapter),
        ProviderKind::Google => Arc::new(GoogleAdapter),
    }
}

/// Common request headers plus the provider's extras.
pub(crate) fn base_headers(provider: &ProviderConfig) -> Vec<(String, String)> {
    let mut headers = vec![
        ("Content-Type".to_string(), "application/json".to_string()),
        ("Accept".to_string(), "text/event-stream".to_string()),
    ];
    headers.extend(provider.headers.iter().cloned());
    headers
}

/// Parse an SSE data payload, reporting failures as a dropped chunk.
pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(
    provider: ProviderKind,
    data: &str,
    out: &mut Vec<PartialEvent>,
) -> Option<T> {
    match serde_json::from_str(data) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(provider = %provider, error = %e, "Dropping malformed chunk");
            let error = ProtocolError::MalformedChunk {
                provider: provider.to_string(),
                reason: e.to_string(),
            };
            out.push(PartialEvent::Malformed(error.to_string()));
            None
        }
    }
}

/// Release a held stop, or an `error` stop when the wire gave none.
pub(crate) fn release_stop(state: &mut DecodeState, out: &mut Vec<PartialEvent>) {
    let (reason, raw) = match state.pending_stop.take() {
        Some((reason, raw)) => (reason, Some(raw)),
        None => (StopReason::Error, None),
    };
    out.push(PartialEvent::Stop { reason, raw });
    state.finished = true;
}
