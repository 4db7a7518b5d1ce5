//! OpenAI-compatible adapter.
//!
//! Works with: OpenAI, OpenRouter, Together AI, Groq, vLLM, Ollama, and any
//! endpoint that speaks `/chat/completions` streaming.
//!
//! Stream quirks handled here:
//! - tool-call deltas are keyed by `index`; the id only appears on the first
//! - `finish_reason` arrives before the usage chunk, so the stop is held
//!   until `[DONE]` (or end-of-stream)

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use switchboard_core::{
    CanonicalRequest, ContentBlock, ImageSource, Message, ProtocolError, ProviderConfig,
    ProviderKind, Role, StopReason, ToolSpec, Usage,
};

use crate::adapter::{
    DecodeState, PartialEvent, ProviderAdapter, WireRequest, base_headers, parse_json,
    release_stop,
};
use crate::sse::SseEvent;

/// Adapter for the `/chat/completions` dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiAdapter;

impl OpenAiAdapter {
    /// Convert our messages to OpenAI API format.
    fn to_api_messages(system: Option<&str>, messages: &[Message]) -> Vec<ApiMessage> {
        let mut result = Vec::with_capacity(messages.len() + 1);

        if let Some(system) = system {
            result.push(ApiMessage::text("system", system));
        }

        for msg in messages {
            match msg.role {
                Role::User => result.push(ApiMessage {
                    role: "user".into(),
                    content: Some(Self::user_content(msg)),
                    tool_calls: None,
                    tool_call_id: None,
                }),
                Role::Assistant => {
                    let tool_calls: Vec<ApiToolCall> = msg
                        .tool_calls()
                        .map(|tc| ApiToolCall {
                            id: tc.id.clone(),
                            r#type: "function".into(),
                            function: ApiFunction {
                                name: tc.name.clone(),
                                arguments: tc.arguments.to_string(),
                            },
                        })
                        .collect();
                    let text = msg.text();
                    result.push(ApiMessage {
                        role: "assistant".into(),
                        content: (!text.is_empty() || tool_calls.is_empty()).then(|| Value::String(text)),
                        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                        tool_call_id: None,
                    });
                }
                // One wire message per result
                Role::Tool => result.extend(msg.tool_results().map(|r| ApiMessage {
                    role: "tool".into(),
                    content: Some(Value::String(r.output_text())),
                    tool_calls: None,
                    tool_call_id: Some(r.call_id.clone()),
                })),
            }
        }

        result
    }

    /// Plain string for text-only messages, a parts array otherwise.
    fn user_content(msg: &Message) -> Value {
        if !msg.has_images() {
            return Value::String(msg.text());
        }
        let parts: Vec<Value> = msg
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(json!({"type": "text", "text": text})),
                ContentBlock::Image { source } => {
                    let url = match source {
                        ImageSource::Url { url } => url.clone(),
                        ImageSource::Base64 { media_type, data } => {
                            format!("data:{media_type};base64,{data}")
                        }
                    };
                    Some(json!({"type": "image_url", "image_url": {"url": url}}))
                }
                _ => None,
            })
            .collect();
        Value::Array(parts)
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolSpec]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.input_schema.clone(),
                },
            })
            .collect()
    }

    fn map_finish_reason(raw: &str) -> StopReason {
        match raw {
            "stop" => StopReason::EndTurn,
            "tool_calls" | "function_call" => StopReason::ToolUse,
            "length" => StopReason::MaxTokens,
            "content_filter" => StopReason::ContentFilter,
            _ => StopReason::Error,
        }
    }

    fn decode_tool_deltas(
        deltas: Vec<StreamToolCallDelta>,
        state: &mut DecodeState,
        out: &mut Vec<PartialEvent>,
    ) {
        for delta in deltas {
            let (name, arguments) = match delta.function {
                Some(f) => (f.name, f.arguments),
                None => (None, None),
            };

            let id = match state.call_ids.get(&delta.index) {
                Some(id) => id.clone(),
                None => {
                    let id = delta
                        .id
                        .filter(|id| !id.is_empty())
                        .unwrap_or_else(|| format!("call_{}", delta.index));
                    state.call_ids.insert(delta.index, id.clone());
                    state.saw_tool_call = true;
                    out.push(PartialEvent::ToolCallStart {
                        id: id.clone(),
                        name: name.unwrap_or_default(),
                    });
                    id
                }
            };

            if let Some(fragment) = arguments.filter(|a| !a.is_empty()) {
                out.push(PartialEvent::ToolCallDelta { id, fragment });
            }
        }
    }
}

impl ProviderAdapter for OpenAiAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAiCompat
    }

    fn encode(
        &self,
        request: &CanonicalRequest,
        model: &str,
        provider: &ProviderConfig,
    ) -> Result<WireRequest, ProtocolError> {
        let mut body = json!({
            "model": model,
            "messages": Self::to_api_messages(request.system.as_deref(), &request.messages),
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        if let Some(temperature) = request.sampling.temperature {
            body["temperature"] = json!(temperature);
        }

        if let Some(max_tokens) = request.sampling.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["tools"] = json!(Self::to_api_tools(&request.tools));
        }

        if !request.sampling.stop.is_empty() {
            body["stop"] = json!(request.sampling.stop);
        }

        let mut headers = base_headers(provider);
        if let Some(key) = &provider.api_key {
            headers.push(("Authorization".into(), format!("Bearer {key}")));
        }

        Ok(WireRequest {
            url: format!("{}/chat/completions", provider.endpoint),
            headers,
            body,
        })
    }

    fn decode_event(&self, event: SseEvent, state: &mut DecodeState, out: &mut Vec<PartialEvent>) {
        let data = event.data.trim();
        if data.is_empty() {
            return;
        }

        // "[DONE]" signals end of stream
        if data == "[DONE]" {
            release_stop(state, out);
            return;
        }

        let Some(chunk) = parse_json::<StreamResponse>(self.kind(), data, out) else {
            return;
        };

        if let Some(error) = chunk.error {
            out.push(PartialEvent::ProviderFailure {
                retryable: error.is_retryable(),
                message: error.message,
            });
            return;
        }

        if let Some(choice) = chunk.choices.into_iter().next() {
            if let Some(text) = choice.delta.content.filter(|c| !c.is_empty()) {
                out.push(PartialEvent::TextDelta(text));
            }
            if let Some(deltas) = choice.delta.tool_calls {
                Self::decode_tool_deltas(deltas, state, out);
            }
            if let Some(raw) = choice.finish_reason {
                state.pending_stop = Some((Self::map_finish_reason(&raw), raw));
            }
        }

        // Handle usage in final stream chunk (stream_options)
        if let Some(usage) = chunk.usage {
            out.push(PartialEvent::Usage(Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            }));
        }
    }

    fn finish(&self, state: &mut DecodeState, out: &mut Vec<PartialEvent>) {
        // Some servers close the stream without [DONE]; a seen finish_reason
        // still completes the response.
        if state.pending_stop.is_some() {
            release_stop(state, out);
        }
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ApiMessage {
    fn text(role: &str, text: &str) -> Self {
        Self {
            role: role.into(),
            content: Some(Value::String(text.into())),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta; arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// In-band error object (OpenRouter and several gateways send these mid-stream).
#[derive(Debug, Deserialize)]
struct StreamError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    r#type: Option<String>,
    #[serde(default)]
    code: Option<Value>,
}

impl StreamError {
    fn is_retryable(&self) -> bool {
        let kind_retryable = matches!(
            self.r#type.as_deref(),
            Some("server_error" | "overloaded_error" | "rate_limit_error" | "timeout")
        );
        let code_retryable = match &self.code {
            Some(Value::Number(n)) => n.as_u64().is_some_and(|c| c == 429 || c >= 500),
            Some(Value::String(s)) => matches!(s.as_str(), "rate_limit_exceeded" | "server_error"),
            _ => false,
        };
        kind_retryable || code_retryable
    }
}
