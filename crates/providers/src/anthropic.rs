//! Anthropic Messages API adapter.
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Native tool use with `tool_use` / `tool_result` content blocks
//! - Typed SSE events with `input_json_delta` argument fragments

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use switchboard_core::{
    CanonicalRequest, ContentBlock, ImageSource, Message, ProtocolError, ProviderConfig,
    ProviderKind, Role, StopReason, ToolSpec, Usage,
};
use tracing::trace;

use crate::adapter::{
    DecodeState, PartialEvent, ProviderAdapter, WireRequest, base_headers, parse_json,
    release_stop,
};
use crate::sse::SseEvent;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Adapter for Anthropic's native Messages API.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicAdapter;

impl AnthropicAdapter {
    /// Convert messages to Anthropic API format with content blocks.
    ///
    /// Tool results travel as `user` turns; consecutive ones are merged so
    /// the conversation keeps alternating roles.
    fn to_api_messages(messages: &[Message]) -> Vec<AnthropicMessage> {
        let mut result: Vec<AnthropicMessage> = Vec::new();
        let mut last_was_tool = false;

        for msg in messages {
            match msg.role {
                Role::User => {
                    result.push(AnthropicMessage {
                        role: "user".into(),
                        content: Self::to_blocks(msg),
                    });
                    last_was_tool = false;
                }
                Role::Assistant => {
                    result.push(AnthropicMessage {
                        role: "assistant".into(),
                        content: Self::to_blocks(msg),
                    });
                    last_was_tool = false;
                }
                Role::Tool => {
                    let blocks = Self::to_blocks(msg);
                    match result.last_mut() {
                        Some(prev) if last_was_tool => prev.content.extend(blocks),
                        _ => result.push(AnthropicMessage {
                            role: "user".into(),
                            content: blocks,
                        }),
                    }
                    last_was_tool = true;
                }
            }
        }

        result
    }

    fn to_blocks(msg: &Message) -> Vec<ApiBlock> {
        msg.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } if text.is_empty() => None,
                ContentBlock::Text { text } => Some(ApiBlock::Text { text: text.clone() }),
                ContentBlock::Image { source } => Some(ApiBlock::Image {
                    source: match source {
                        ImageSource::Base64 { media_type, data } => json!({
                            "type": "base64",
                            "media_type": media_type,
                            "data": data,
                        }),
                        ImageSource::Url { url } => json!({"type": "url", "url": url}),
                    },
                }),
                ContentBlock::ToolCall(tc) => Some(ApiBlock::ToolUse {
                    id: tc.id.clone(),
                    name: tc.name.clone(),
                    input: tc.arguments.clone(),
                }),
                ContentBlock::ToolResult(r) => Some(ApiBlock::ToolResult {
                    tool_use_id: r.call_id.clone(),
                    content: r.output_text(),
                    is_error: r.is_error,
                }),
            })
            .collect()
    }

    /// Convert tool definitions to Anthropic format.
    fn to_api_tools(tools: &[ToolSpec]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.input_schema.clone(),
            })
            .collect()
    }

    fn map_stop_reason(raw: &str) -> StopReason {
        match raw {
            "end_turn" | "stop_sequence" => StopReason::EndTurn,
            "tool_use" => StopReason::ToolUse,
            "max_tokens" => StopReason::MaxTokens,
            "refusal" => StopReason::ContentFilter,
            _ => StopReason::Error,
        }
    }
}

impl ProviderAdapter for AnthropicAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn encode(
        &self,
        request: &CanonicalRequest,
        model: &str,
        provider: &ProviderConfig,
    ) -> Result<WireRequest, ProtocolError> {
        let max_tokens = request.sampling.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);

        let mut body = json!({
            "model": model,
            "messages": Self::to_api_messages(&request.messages),
            "max_tokens": max_tokens,
            "stream": true,
        });

        if let Some(system) = &request.system {
            body["system"] = json!(system);
        }

        if let Some(temperature) = request.sampling.temperature {
            body["temperature"] = json!(temperature);
        }

        if !request.tools.is_empty() {
            body["tools"] = json!(Self::to_api_tools(&request.tools));
        }

        if !request.sampling.stop.is_empty() {
            body["stop_sequences"] = json!(request.sampling.stop);
        }

        let mut headers = base_headers(provider);
        headers.push(("anthropic-version".into(), ANTHROPIC_VERSION.into()));
        if let Some(key) = &provider.api_key {
            headers.push(("x-api-key".into(), key.clone()));
        }

        Ok(WireRequest {
            url: format!("{}/v1/messages", provider.endpoint),
            headers,
            body,
        })
    }

    fn decode_event(&self, event: SseEvent, state: &mut DecodeState, out: &mut Vec<PartialEvent>) {
        let Some(event) = parse_json::<StreamEvent>(self.kind(), &event.data, out) else {
            return;
        };

        match event {
            StreamEvent::MessageStart { message } => {
                state.prompt_tokens = message.usage.input_tokens;
            }
            StreamEvent::ContentBlockStart { index, content_block } => match content_block {
                StartBlock::ToolUse { id, name } => {
                    state.call_ids.insert(index, id.clone());
                    state.saw_tool_call = true;
                    out.push(PartialEvent::ToolCallStart { id, name });
                }
                StartBlock::Text { text } if !text.is_empty() => {
                    out.push(PartialEvent::TextDelta(text));
                }
                _ => {}
            },
            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                BlockDelta::TextDelta { text } => out.push(PartialEvent::TextDelta(text)),
                BlockDelta::InputJsonDelta { partial_json } => match state.call_ids.get(&index) {
                    Some(id) if !partial_json.is_empty() => out.push(PartialEvent::ToolCallDelta {
                        id: id.clone(),
                        fragment: partial_json,
                    }),
                    Some(_) => {}
                    None => out.push(PartialEvent::Malformed(
                        ProtocolError::MalformedChunk {
                            provider: self.kind().to_string(),
                            reason: format!("input_json_delta for block {index} without tool_use start"),
                        }
                        .to_string(),
                    )),
                },
                // Thinking, signatures, citations
                BlockDelta::Other => {}
            },
            StreamEvent::ContentBlockStop { index } => {
                if let Some(id) = state.call_ids.remove(&index) {
                    out.push(PartialEvent::ToolCallEnd { id });
                }
            }
            StreamEvent::MessageDelta { delta, usage } => {
                if let Some(raw) = delta.stop_reason {
                    state.pending_stop = Some((Self::map_stop_reason(&raw), raw));
                }
                if let Some(usage) = usage {
                    let prompt = usage.input_tokens.unwrap_or(state.prompt_tokens);
                    out.push(PartialEvent::Usage(Usage::new(prompt, usage.output_tokens)));
                }
            }
            StreamEvent::MessageStop => release_stop(state, out),
            StreamEvent::Ping => {}
            StreamEvent::Error { error } => {
                let retryable = matches!(
                    error.r#type.as_str(),
                    "overloaded_error" | "api_error" | "rate_limit_error"
                );
                out.push(PartialEvent::ProviderFailure {
                    message: format!("{}: {}", error.r#type, error.message),
                    retryable,
                });
            }
            StreamEvent::Unknown => {
                trace!("Ignoring unknown Anthropic event type");
            }
        }
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<ApiBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiBlock {
    Text {
        text: String,
    },
    Image {
        source: Value,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: Value,
}

// --- Streaming types ---

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart {
        message: StartMessage,
    },
    ContentBlockStart {
        index: u32,
        content_block: StartBlock,
    },
    ContentBlockDelta {
        index: u32,
        delta: BlockDelta,
    },
    ContentBlockStop {
        index: u32,
    },
    MessageDelta {
        #[serde(default)]
        delta: MessageDeltaBody,
        #[serde(default)]
        usage: Option<DeltaUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: ApiError,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct StartMessage {
    #[serde(default)]
    usage: StartUsage,
}

#[derive(Debug, Default, Deserialize)]
struct StartUsage {
    #[serde(default)]
    input_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StartBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct MessageDeltaBody {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeltaUsage {
    #[serde(default)]
    input_tokens: Option<u32>,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    r#type: String,
    #[serde(default)]
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::{ToolCall, ToolResult};

    fn sse(event: &str, data: &str) -> String {
        format!("event: {event}\ndata: {data}\n\n")
    }

    fn decode_all(chunks: &[String]) -> Vec<PartialEvent> {
        let adapter = AnthropicAdapter;
        let mut state = DecodeState::new();
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(adapter.decode(chunk.as_bytes(), &mut state));
        }
        events.extend(adapter.flush(&mut state));
        events
    }

    #[test]
    fn encode_request_shape() {
        let provider = ProviderConfig::new("anthropic", ProviderKind::Anthropic).with_api_key("sk-ant");
        let request = CanonicalRequest::new("claude-sonnet-4", vec![Message::user("Hello")])
            .with_system("Be brief");

        let wire = AnthropicAdapter.encode(&request, "claude-sonnet-4", &provider).unwrap();
        assert_eq!(wire.url, "https://api.anthropic.com/v1/messages");
        assert_eq!(wire.header("x-api-key"), Some("sk-ant"));
        assert_eq!(wire.header("anthropic-version"), Some(ANTHROPIC_VERSION));
        assert_eq!(wire.body["system"], "Be brief");
        assert_eq!(wire.body["max_tokens"], DEFAULT_MAX_TOKENS);
        assert_eq!(wire.body["messages"][0]["content"][0]["type"], "text");
    }

    #[test]
    fn consecutive_tool_results_merge_into_one_user_turn() {
        let calls = vec![
            ToolCall { id: "t1".into(), name: "a".into(), arguments: json!({}) },
            ToolCall { id: "t2".into(), name: "b".into(), arguments: json!({"k": 1}) },
        ];
        let messages = vec![
            Message::user("go"),
            Message::assistant_with_tool_calls("on it", calls),
            Message::tool_result(ToolResult::success("t1", json!("one"), 1)),
            Message::tool_result(ToolResult::failure("t2", "broken", 1)),
        ];
        let api = AnthropicAdapter::to_api_messages(&messages);
        assert_eq!(api.len(), 3);
        assert_eq!(api[2].role, "user");
        assert_eq!(api[2].content.len(), 2);

        let json = serde_json::to_value(&api).unwrap();
        assert_eq!(json[1]["content"][1]["type"], "tool_use");
        assert_eq!(json[1]["content"][2]["input"]["k"], 1);
        assert_eq!(json[2]["content"][0]["tool_use_id"], "t1");
        assert!(json[2]["content"][0].get("is_error").is_none());
        assert_eq!(json[2]["content"][1]["is_error"], true);
    }

    #[test]
    fn decode_text_stream() {
        let events = decode_all(&[
            sse("message_start", r#"{"type":"message_start","message":{"id":"msg_1","usage":{"input_tokens":12,"output_tokens":1}}}"#),
            sse("content_block_start", r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#),
            sse("ping", r#"{"type":"ping"}"#),
            sse("content_block_delta", r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#),
            sse("content_block_stop", r#"{"type":"content_block_stop","index":0}"#),
            sse("message_delta", r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":3}}"#),
            sse("message_stop", r#"{"type":"message_stop"}"#),
        ]);
        assert_eq!(
            events,
            vec![
                PartialEvent::TextDelta("Hi".into()),
                PartialEvent::Usage(Usage::new(12, 3)),
                PartialEvent::Stop { reason: StopReason::EndTurn, raw: Some("end_turn".into()) },
            ]
        );
    }

    #[test]
    fn decode_tool_use_fragments() {
        let events = decode_all(&[
            sse("content_block_start", r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"calc","input":{}}}"#),
            sse("content_block_delta", r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"a\":1"}}"#),
            sse("content_block_delta", r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":",\"b\":2}"}}"#),
            sse("content_block_stop", r#"{"type":"content_block_stop","index":1}"#),
            sse("message_delta", r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"}}"#),
            sse("message_stop", r#"{"type":"message_stop"}"#),
        ]);
        assert_eq!(events[0], PartialEvent::ToolCallStart { id: "toolu_1".into(), name: "calc".into() });
        assert_eq!(events[1], PartialEvent::ToolCallDelta { id: "toolu_1".into(), fragment: "{\"a\":1".into() });
        assert_eq!(events[2], PartialEvent::ToolCallDelta { id: "toolu_1".into(), fragment: ",\"b\":2}".into() });
        assert_eq!(events[3], PartialEvent::ToolCallEnd { id: "toolu_1".into() });
        assert_eq!(events[4], PartialEvent::Stop { reason: StopReason::ToolUse, raw: Some("tool_use".into()) });
    }

    #[test]
    fn refusal_maps_to_content_filter() {
        assert_eq!(AnthropicAdapter::map_stop_reason("refusal"), StopReason::ContentFilter);
        assert_eq!(AnthropicAdapter::map_stop_reason("stop_sequence"), StopReason::EndTurn);
        assert_eq!(AnthropicAdapter::map_stop_reason("pause_turn"), StopReason::Error);
    }

    #[test]
    fn thinking_deltas_are_ignored() {
        let events = decode_all(&[sse(
            "content_block_delta",
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":"hmm"}}"#,
        )]);
        assert!(events.is_empty());
    }

    #[test]
    fn overloaded_error_is_retryable_failure() {
        let events = decode_all(&[sse(
            "error",
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        )]);
        assert_eq!(
            events,
            vec![PartialEvent::ProviderFailure {
                message: "overloaded_error: Overloaded".into(),
                retryable: true
            }]
        );
    }

    #[test]
    fn eof_without_message_stop_has_no_stop() {
        let events = decode_all(&[sse(
            "content_block_delta",
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"partial"}}"#,
        )]);
        assert_eq!(events, vec![PartialEvent::TextDelta("partial".into())]);
    }
}
