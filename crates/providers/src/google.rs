//! Google Generative Language API adapter.
//!
//! Each SSE payload is a complete `GenerateContentResponse`. Function calls
//! arrive whole and without identifiers, so the adapter synthesizes ids and
//! emits start, one delta with the full arguments, and end back to back.

use std::collections::HashMap;

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

/// Adapter for `models/{model}:streamGenerateContent`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GoogleAdapter;

impl GoogleAdapter {
    fn to_contents(messages: &[Message]) -> Result<Vec<GoogleContent>, ProtocolError> {
        // functionResponse parts need the tool name. Synthesized ids restart
        // with every response, so a result resolves to the nearest preceding
        // call with its id.
        let mut names: HashMap<&str, &str> = HashMap::new();

        let mut contents: Vec<GoogleContent> = Vec::new();
        let mut last_was_tool = false;

        for msg in messages {
            names.extend(msg.tool_calls().map(|c| (c.id.as_str(), c.name.as_str())));
            let role = match msg.role {
                Role::Assistant => "model",
                Role::User | Role::Tool => "user",
            };
            let mut parts = Vec::with_capacity(msg.content.len());
            for block in &msg.content {
                let part = match block {
                    ContentBlock::Text { text } if text.is_empty() => continue,
                    ContentBlock::Text { text } => GooglePart::Text(text.clone()),
                    ContentBlock::Image { source } => match source {
                        ImageSource::Base64 { media_type, data } => {
                            GooglePart::InlineData(GoogleInlineData {
                                mime_type: media_type.clone(),
                                data: data.clone(),
                            })
                        }
                        ImageSource::Url { .. } => {
                            return Err(ProtocolError::Encode(
                                "google requires inline (base64) image data".into(),
                            ));
                        }
                    },
                    ContentBlock::ToolCall(call) => GooglePart::FunctionCall(GoogleFunctionCall {
                        name: call.name.clone(),
                        args: call.arguments.clone(),
                    }),
                    ContentBlock::ToolResult(result) => {
                        let name = names.get(result.call_id.as_str()).ok_or_else(|| {
                            ProtocolError::Encode(format!(
                                "tool result '{}' has no matching tool call",
                                result.call_id
                            ))
                        })?;
                        let key = if result.is_error { "error" } else { "content" };
                        GooglePart::FunctionResponse(GoogleFunctionResponse {
                            name: (*name).to_string(),
                            response: json!({ key: result.output }),
                        })
                    }
                };
                parts.push(part);
            }

            let is_tool = msg.role == Role::Tool;
            match contents.last_mut() {
                Some(prev) if is_tool && last_was_tool => prev.parts.extend(parts),
                _ => contents.push(GoogleContent {
                    role: Some(role.into()),
                    parts,
                }),
            }
            last_was_tool = is_tool;
        }

        Ok(contents)
    }

    fn to_tools(tools: &[ToolSpec]) -> Vec<GoogleTool> {
        vec![GoogleTool {
            function_declarations: tools
                .iter()
                .map(|t| GoogleFunctionDeclaration {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.input_schema.clone(),
                })
                .collect(),
        }]
    }

    fn map_finish_reason(raw: &str, saw_tool_call: bool) -> StopReason {
        match raw {
            "STOP" if saw_tool_call => StopReason::ToolUse,
            "STOP" => StopReason::EndTurn,
            "MAX_TOKENS" => StopReason::MaxTokens,
            "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII"
            | "IMAGE_SAFETY" => StopReason::ContentFilter,
            _ => StopReason::Error,
        }
    }
}

impl ProviderAdapter for GoogleAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    fn encode(
        &self,
        request: &CanonicalRequest,
        model: &str,
        provider: &ProviderConfig,
    ) -> Result<WireRequest, ProtocolError> {
        let body = GoogleRequest {
            contents: Self::to_contents(&request.messages)?,
            system_instruction: request.system.as_ref().map(|s| GoogleContent {
                role: None,
                parts: vec![GooglePart::Text(s.clone())],
            }),
            generation_config: Some(GoogleGenerationConfig {
                temperature: request.sampling.temperature,
                max_output_tokens: request.sampling.max_tokens,
                stop_sequences: (!request.sampling.stop.is_empty())
                    .then(|| request.sampling.stop.clone()),
            }),
            tools: (!request.tools.is_empty()).then(|| Self::to_tools(&request.tools)),
        };
        let body = serde_json::to_value(&body).map_err(|e| ProtocolError::Encode(e.to_string()))?;

        let mut headers = base_headers(provider);
        if let Some(key) = &provider.api_key {
            headers.push(("x-goog-api-key".into(), key.clone()));
        }

        Ok(WireRequest {
            url: format!(
                "{}/models/{model}:streamGenerateContent?alt=sse",
                provider.endpoint
            ),
            headers,
            body,
        })
    }

    fn decode_event(&self, event: SseEvent, state: &mut DecodeState, out: &mut Vec<PartialEvent>) {
        let Some(chunk) = parse_json::<StreamChunk>(self.kind(), &event.data, out) else {
            return;
        };

        if let Some(error) = chunk.error {
            let retryable = error.code == 429
                || error.code >= 500
                || matches!(error.status.as_deref(), Some("UNAVAILABLE" | "RESOURCE_EXHAUSTED"));
            out.push(PartialEvent::ProviderFailure {
                message: error.message,
                retryable,
            });
            return;
        }

        // Cumulative; the last value seen is reported once, before the stop.
        if let Some(usage) = chunk.usage_metadata {
            state.usage = Some(Usage {
                prompt_tokens: usage.prompt_token_count,
                completion_tokens: usage.candidates_token_count,
                total_tokens: usage.total_token_count,
            });
        }

        let Some(candidate) = chunk.candidates.into_iter().next() else {
            if let Some(reason) = chunk.prompt_feedback.and_then(|f| f.block_reason) {
                state.pending_stop = Some((StopReason::ContentFilter, reason));
                self.finish(state, out);
            }
            return;
        };

        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if part.thought {
                continue;
            }
            if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                out.push(PartialEvent::TextDelta(text));
            }
            if let Some(call) = part.function_call {
                let id = state.synthesize_id();
                state.saw_tool_call = true;
                out.push(PartialEvent::ToolCallStart {
                    id: id.clone(),
                    name: call.name,
                });
                let args = call.args.unwrap_or_else(|| json!({}));
                out.push(PartialEvent::ToolCallDelta {
                    id: id.clone(),
                    fragment: args.to_string(),
                });
                out.push(PartialEvent::ToolCallEnd { id });
            }
        }

        if let Some(raw) = candidate.finish_reason {
            state.pending_stop = Some((Self::map_finish_reason(&raw, state.saw_tool_call), raw));
            self.finish(state, out);
        }
    }

    fn finish(&self, state: &mut DecodeState, out: &mut Vec<PartialEvent>) {
        if state.pending_stop.is_none() {
            return;
        }
        if let Some(usage) = state.usage.take() {
            out.push(PartialEvent::Usage(usage));
        }
        release_stop(state, out);
    }
}

// -- Request types --

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GoogleRequest {
    contents: Vec<GoogleContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GoogleContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GoogleGenerationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<GoogleTool>>,
}

#[derive(Debug, Serialize)]
struct GoogleContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<GooglePart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum GooglePart {
    Text(String),
    InlineData(GoogleInlineData),
    FunctionCall(GoogleFunctionCall),
    FunctionResponse(GoogleFunctionResponse),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GoogleInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GoogleFunctionCall {
    name: String,
    args: Value,
}

#[derive(Debug, Serialize)]
struct GoogleFunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GoogleGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GoogleTool {
    function_declarations: Vec<GoogleFunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct GoogleFunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

// -- Streaming types (lenient: every field optional) --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamChunk {
    #[serde(default)]
    candidates: Vec<StreamCandidate>,
    #[serde(default)]
    usage_metadata: Option<StreamUsage>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamCandidate {
    #[serde(default)]
    content: Option<StreamContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamContent {
    #[serde(default)]
    parts: Vec<StreamPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamPart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    function_call: Option<StreamFunctionCall>,
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionCall {
    name: String,
    #[serde(default)]
    args: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}
