//! End-to-end tests for the agent loop.
//!
//! These drive the full pipeline (adapter, normalizer, unified client, agent
//! state machine, tool registry) over a scripted in-memory transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use switchboard_agent::{AgentEvent, AgentLoop, Completion, FailureReason, LoopState};
use switchboard_core::{
    ContentBlock, Conversation, Message, ProviderConfig, ProviderKind, Role, ToolError, ToolRegistry,
    ToolResult, ToolSpec, TransportError,
};
use switchboard_providers::{ScriptedResponse, ScriptedTransport, UnifiedClient};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// ── OpenAI-style scripted streams ────────────────────────────────────────

fn chunk(delta: Value, finish: Option<&str>) -> String {
    json!({"choices": [{"index": 0, "delta": delta, "finish_reason": finish}]}).to_string()
}

fn usage(prompt: u32, completion: u32) -> String {
    json!({
        "choices": [],
        "usage": {"prompt_tokens": prompt, "completion_tokens": completion, "total_tokens": prompt + completion}
    })
    .to_string()
}

fn text_reply(text: &str) -> ScriptedResponse {
    ScriptedResponse::sse([
        chunk(json!({"content": text}), None),
        chunk(json!({}), Some("stop")),
        usage(10, 5),
        "[DONE]".to_string(),
    ])
}

/// One tool call per `(id, name, arguments)`, arguments sent in one fragment.
fn tool_reply(calls: &[(&str, &str, Value)]) -> ScriptedResponse {
    let mut payloads = Vec::new();
    for (index, (id, name, arguments)) in calls.iter().enumerate() {
        payloads.push(chunk(
            json!({"tool_calls": [{"index": index, "id": id, "type": "function",
                                   "function": {"name": name, "arguments": ""}}]}),
            None,
        ));
        payloads.push(chunk(
            json!({"tool_calls": [{"index": index, "function": {"arguments": arguments.to_string()}}]}),
            None,
        ));
    }
    payloads.push(chunk(json!({}), Some("tool_calls")));
    payloads.push(usage(20, 8));
    payloads.push("[DONE]".to_string());
    ScriptedResponse::sse(payloads)
}

// ── Fixtures ─────────────────────────────────────────────────────────────

fn client(transport: Arc<ScriptedTransport>) -> Arc<UnifiedClient> {
    Arc::new(
        UnifiedClient::new(transport)
            .with_provider(ProviderConfig::new("openai", ProviderKind::OpenAiCompat).with_api_key("sk-test"))
            .with_provider(ProviderConfig::new("anthropic", ProviderKind::Anthropic).with_api_key("sk-ant"))
            .with_provider(ProviderConfig::new("google", ProviderKind::Google).with_api_key("AIza-test")),
    )
}

fn tools() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register_fn(
        ToolSpec::new(
            "add",
            "Add two numbers",
            json!({
                "type": "object",
                "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
                "required": ["a", "b"]
            }),
        )
        .concurrency_safe(true),
        |args: Value| async move {
            let a = args["a"].as_f64().unwrap_or_default();
            let b = args["b"].as_f64().unwrap_or_default();
            Ok(json!(a + b))
        },
    );
    registry.register_fn(
        ToolSpec::new("sleep", "Sleep for `ms` then echo it", json!({"type": "object"})).concurrency_safe(true),
        |args: Value| async move {
            let ms = args["ms"].as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(json!(ms))
        },
    );
    registry.register_fn(ToolSpec::new("explode", "Always fails", json!({})), |_| async {
        Err(ToolError::ExecutionFailed {
            tool_name: "explode".into(),
            reason: "disk full".into(),
        })
    });
    registry
}

fn conversation(prompt: &str) -> Conversation {
    let mut conv = Conversation::new();
    conv.push(Message::user(prompt));
    conv
}

fn tool_results(conv: &Conversation) -> Vec<ToolResult> {
    conv.messages()
        .iter()
        .filter(|m| m.role == Role::Tool)
        .flat_map(|m| m.tool_results().cloned())
        .collect()
}

// ── Tests ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn tool_round_trip_then_answer() {
    let transport = Arc::new(ScriptedTransport::new([
        tool_reply(&[("call_1", "add", json!({"a": 2, "b": 2}))]),
        text_reply("2 + 2 = 4"),
    ]));
    let agent = AgentLoop::new(client(transport.clone()), Arc::new(tools()), "gpt-4o");

    let mut conv = conversation("What is 2 + 2?");
    let outcome = agent.run(&mut conv).await;

    assert_eq!(outcome.completion(), Some(Completion::Clean));
    assert_eq!(outcome.turns, 2);
    assert_eq!(outcome.tool_calls_made, 1);
    assert_eq!(outcome.text, "2 + 2 = 4");
    assert_eq!(outcome.usage.total_tokens, 28 + 15);

    // user, assistant(tool call), tool, assistant
    let roles: Vec<Role> = conv.messages().iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
    assert_eq!(tool_results(&conv)[0].output, json!(4.0));

    // The second request carries the tool exchange
    let second = &transport.requests()[1].body;
    let messages = second["messages"].as_array().unwrap();
    assert_eq!(messages[1]["tool_calls"][0]["id"], "call_1");
    assert_eq!(messages[2]["role"], "tool");
    assert_eq!(messages[2]["tool_call_id"], "call_1");
    assert_eq!(second["tools"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn split_argument_fragments_reassemble() {
    let split = ScriptedResponse::sse([
        chunk(
            json!({"tool_calls": [{"index": 0, "id": "call_x", "type": "function",
                                   "function": {"name": "add", "arguments": ""}}]}),
            None,
        ),
        chunk(json!({"tool_calls": [{"index": 0, "function": {"arguments": "{\"a\":1"}}]}), None),
        chunk(json!({"tool_calls": [{"index": 0, "function": {"arguments": ",\"b\":2}"}}]}), None),
        chunk(json!({}), Some("tool_calls")),
        "[DONE]".to_string(),
    ]);
    let transport = Arc::new(ScriptedTransport::new([split, text_reply("3")]));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let agent = AgentLoop::new(client(transport), Arc::new(tools()), "gpt-4o").with_event_sink(tx);

    let mut conv = conversation("1 + 2?");
    agent.run(&mut conv).await;
    drop(agent);

    let assistant = &conv.messages()[1];
    let call = assistant.tool_calls().next().unwrap();
    assert_eq!(call.arguments, json!({"a": 1, "b": 2}));

    let mut ends = 0;
    while let Some(event) = rx.recv().await {
        if let AgentEvent::Stream { event: switchboard_core::StreamEvent::ToolCallEnd { call }, .. } = event {
            assert_eq!(call.arguments, json!({"a": 1, "b": 2}));
            ends += 1;
        }
    }
    assert_eq!(ends, 1);
}

#[tokio::test(start_paused = true)]
async fn results_follow_call_order_not_completion_order() {
    let transport = Arc::new(ScriptedTransport::new([
        tool_reply(&[
            ("slow", "sleep", json!({"ms": 300})),
            ("medium", "sleep", json!({"ms": 200})),
            ("fast", "sleep", json!({"ms": 100})),
        ]),
        text_reply("done"),
    ]));
    let agent = AgentLoop::new(client(transport), Arc::new(tools()), "gpt-4o");

    let mut conv = conversation("nap");
    let outcome = agent.run(&mut conv).await;
    assert!(outcome.is_done());

    let ids: Vec<String> = tool_results(&conv).into_iter().map(|r| r.call_id).collect();
    assert_eq!(ids, vec!["slow", "medium", "fast"]);
    // One tool message per call
    assert_eq!(conv.messages().iter().filter(|m| m.role == Role::Tool).count(), 3);
}

#[tokio::test]
async fn failing_tool_is_reported_and_loop_continues() {
    let transport = Arc::new(ScriptedTransport::new([
        tool_reply(&[("call_1", "explode", json!({}))]),
        text_reply("The tool failed: disk full."),
    ]));
    let agent = AgentLoop::new(client(transport.clone()), Arc::new(tools()), "gpt-4o");

    let mut conv = conversation("try it");
    let outcome = agent.run(&mut conv).await;

    assert!(outcome.is_done());
    assert_eq!(transport.open_count(), 2);
    let result = &tool_results(&conv)[0];
    assert!(result.is_error);
    assert!(result.output_text().contains("disk full"));
}

#[tokio::test]
async fn unknown_tool_and_bad_arguments_become_error_results() {
    let transport = Arc::new(ScriptedTransport::new([
        tool_reply(&[
            ("call_1", "teleport", json!({})),
            ("call_2", "add", json!({"a": 1})),
        ]),
        text_reply("ok"),
    ]));
    let agent = AgentLoop::new(client(transport), Arc::new(tools()), "gpt-4o");

    let mut conv = conversation("go");
    assert!(agent.run(&mut conv).await.is_done());

    let results = tool_results(&conv);
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.is_error));
}

#[tokio::test]
async fn turn_cap_stops_before_another_model_call() {
    let transport = Arc::new(ScriptedTransport::new([
        tool_reply(&[("call_1", "add", json!({"a": 1, "b": 1}))]),
        tool_reply(&[("call_2", "add", json!({"a": 2, "b": 2}))]),
        text_reply("never requested"),
    ]));
    let agent = AgentLoop::new(client(transport.clone()), Arc::new(tools()), "gpt-4o").with_max_turns(2);

    let mut conv = conversation("keep adding");
    let outcome = agent.run(&mut conv).await;

    assert_eq!(
        outcome.state,
        LoopState::Failed { reason: FailureReason::MaxTurnsExceeded { limit: 2 } }
    );
    assert_eq!(transport.open_count(), 2);
    assert_eq!(outcome.turns, 2);
    // Both tool rounds were completed before the cap was hit
    assert_eq!(tool_results(&conv).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn transient_503_is_retried_and_run_completes() {
    let transport = Arc::new(ScriptedTransport::new([
        ScriptedResponse::fail(TransportError::Status { status: 503, body: "unavailable".into() }),
        text_reply("hello"),
    ]));
    let agent = AgentLoop::new(client(transport.clone()), Arc::new(tools()), "gpt-4o");

    let mut conv = conversation("hi");
    let outcome = agent.run(&mut conv).await;

    assert!(outcome.is_done());
    assert_eq!(outcome.turns, 1);
    assert_eq!(transport.open_count(), 2);
    assert_eq!(conv.len(), 2);
}

#[tokio::test]
async fn cancel_before_any_byte_leaves_conversation_unchanged() {
    let transport = Arc::new(ScriptedTransport::new([text_reply("unused")]));
    let agent = AgentLoop::new(client(transport.clone()), Arc::new(tools()), "gpt-4o");

    let mut conv = conversation("hi");
    let before: Vec<String> = conv.messages().iter().map(|m| m.id.clone()).collect();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let outcome = agent.run_with_cancel(&mut conv, cancel).await;

    assert_eq!(outcome.state, LoopState::Canceled);
    assert_eq!(transport.open_count(), 0);
    let after: Vec<String> = conv.messages().iter().map(|m| m.id.clone()).collect();
    assert_eq!(before, after);
}

#[tokio::test(start_paused = true)]
async fn cancel_mid_stream_keeps_partial_out_of_conversation() {
    let stalled = ScriptedResponse::sse([chunk(json!({"content": "Let me think"}), None)]).then_hang();
    let transport = Arc::new(ScriptedTransport::new([stalled]));
    let agent = AgentLoop::new(client(transport), Arc::new(tools()), "gpt-4o");

    let cancel = CancellationToken::new();
    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            cancel.cancel();
        })
    };

    let mut conv = conversation("hard question");
    let outcome = agent.run_with_cancel(&mut conv, cancel).await;
    canceller.await.unwrap();

    assert_eq!(outcome.state, LoopState::Canceled);
    assert_eq!(outcome.partial.as_ref().map(|p| p.text.as_str()), Some("Let me think"));
    assert_eq!(conv.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_while_opening_leaves_conversation_unchanged() {
    let transport = Arc::new(ScriptedTransport::new([ScriptedResponse::stall()]));
    let agent = AgentLoop::new(client(transport.clone()), Arc::new(tools()), "gpt-4o");

    let cancel = CancellationToken::new();
    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            cancel.cancel();
        })
    };

    let mut conv = conversation("anyone there?");
    let outcome = agent.run_with_cancel(&mut conv, cancel).await;
    canceller.await.unwrap();

    assert_eq!(outcome.state, LoopState::Canceled);
    assert_eq!(transport.open_count(), 1);
    assert!(outcome.partial.is_none());
    assert_eq!(conv.len(), 1);
}

#[tokio::test]
async fn cancel_during_tools_discards_results_then_resumes() {
    let cancel = CancellationToken::new();
    let executions = Arc::new(AtomicUsize::new(0));

    let mut registry = ToolRegistry::new();
    {
        let cancel = cancel.clone();
        let executions = executions.clone();
        registry.register_fn(ToolSpec::new("deploy", "Deploy the app", json!({})), move |_| {
            let cancel = cancel.clone();
            let executions = executions.clone();
            async move {
                executions.fetch_add(1, Ordering::SeqCst);
                // The user hits Ctrl-C while the tool is running
                cancel.cancel();
                Ok(json!("deployed"))
            }
        });
    }
    let registry = Arc::new(registry);

    let transport = Arc::new(ScriptedTransport::new([tool_reply(&[("call_1", "deploy", json!({}))])]));
    let agent = AgentLoop::new(client(transport.clone()), registry.clone(), "gpt-4o");

    let mut conv = conversation("ship it");
    let outcome = agent.run_with_cancel(&mut conv, cancel).await;

    assert_eq!(outcome.state, LoopState::Canceled);
    assert_eq!(executions.load(Ordering::SeqCst), 1);
    // The assistant's tool request is kept, the discarded result is not
    assert_eq!(conv.len(), 2);
    assert_eq!(conv.unanswered_tool_calls().len(), 1);

    // A new run picks up the unanswered call before asking the model again
    transport.push(text_reply("Deployed."));
    let outcome = agent.run(&mut conv).await;

    assert!(outcome.is_done());
    assert_eq!(outcome.turns, 1);
    assert_eq!(executions.load(Ordering::SeqCst), 2);
    assert!(conv.unanswered_tool_calls().is_empty());
    let roles: Vec<Role> = conv.messages().iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
}

#[tokio::test]
async fn max_tokens_appends_text_only() {
    let cut = ScriptedResponse::sse([
        chunk(json!({"content": "The answer is"}), None),
        chunk(
            json!({"tool_calls": [{"index": 0, "id": "call_1", "type": "function",
                                   "function": {"name": "add", "arguments": "{\"a\":"}}]}),
            None,
        ),
        chunk(json!({}), Some("length")),
        "[DONE]".to_string(),
    ]);
    let agent = AgentLoop::new(client(Arc::new(ScriptedTransport::new([cut]))), Arc::new(tools()), "gpt-4o");

    let mut conv = conversation("long answer please");
    let outcome = agent.run(&mut conv).await;

    assert_eq!(outcome.completion(), Some(Completion::Truncated));
    let last = conv.last().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert_eq!(last.text(), "The answer is");
    assert_eq!(last.tool_calls().count(), 0);
    assert!(conv.unanswered_tool_calls().is_empty());
}

#[tokio::test]
async fn content_filter_is_filtered_completion() {
    let blocked = ScriptedResponse::sse([
        chunk(json!({"content": "I can"}), None),
        chunk(json!({}), Some("content_filter")),
        "[DONE]".to_string(),
    ]);
    let agent = AgentLoop::new(client(Arc::new(ScriptedTransport::new([blocked]))), Arc::new(tools()), "gpt-4o");
    let outcome = agent.run(&mut conversation("something spicy")).await;
    assert_eq!(outcome.completion(), Some(Completion::Filtered));
}

#[tokio::test]
async fn tool_use_stop_without_calls_is_protocol_failure() {
    let bogus = ScriptedResponse::sse([
        chunk(json!({"content": "calling a tool"}), None),
        chunk(json!({}), Some("tool_calls")),
        "[DONE]".to_string(),
    ]);
    let agent = AgentLoop::new(client(Arc::new(ScriptedTransport::new([bogus]))), Arc::new(tools()), "gpt-4o");

    let mut conv = conversation("hi");
    let outcome = agent.run(&mut conv).await;

    assert!(matches!(outcome.failure(), Some(FailureReason::ProviderProtocol { .. })));
    assert_eq!(outcome.partial.as_ref().map(|p| p.text.as_str()), Some("calling a tool"));
    assert_eq!(conv.len(), 1);
}

#[tokio::test]
async fn unrecognized_stop_reason_is_protocol_failure() {
    let odd = ScriptedResponse::sse([
        chunk(json!({"content": "hmm"}), None),
        chunk(json!({}), Some("recitation")),
        "[DONE]".to_string(),
    ]);
    let agent = AgentLoop::new(client(Arc::new(ScriptedTransport::new([odd]))), Arc::new(tools()), "gpt-4o");
    let outcome = agent.run(&mut conversation("hi")).await;
    match outcome.failure() {
        Some(FailureReason::ProviderProtocol { message }) => assert!(message.contains("recitation")),
        other => panic!("Unexpected failure: {other:?}"),
    }
}

#[tokio::test]
async fn failure_after_content_is_recoverable_and_not_appended() {
    let broken = ScriptedResponse::sse([chunk(json!({"content": "Partial answ"}), None)])
        .then_error(TransportError::Interrupted("connection reset".into()));
    let transport = Arc::new(ScriptedTransport::new([broken, text_reply("should not be used")]));
    let agent = AgentLoop::new(client(transport.clone()), Arc::new(tools()), "gpt-4o");

    let mut conv = conversation("hi");
    let outcome = agent.run(&mut conv).await;

    assert!(matches!(
        outcome.failure(),
        Some(FailureReason::Transport { recoverable: true, .. })
    ));
    assert_eq!(transport.open_count(), 1);
    assert_eq!(outcome.partial.map(|p| p.text), Some("Partial answ".to_string()));
    assert_eq!(conv.len(), 1);
}

#[tokio::test]
async fn authentication_failure_is_not_recoverable() {
    let transport = Arc::new(ScriptedTransport::new([ScriptedResponse::fail(TransportError::Authentication(
        "invalid x-api-key".into(),
    ))]));
    let agent = AgentLoop::new(client(transport), Arc::new(tools()), "gpt-4o");
    let outcome = agent.run(&mut conversation("hi")).await;
    assert!(matches!(
        outcome.failure(),
        Some(FailureReason::Transport { recoverable: false, .. })
    ));
}

#[tokio::test]
async fn anthropic_tool_round_trip_via_prefix() {
    let sse = |event: &str, data: Value| format!("event: {event}\ndata: {data}\n\n");
    let tool_turn = ScriptedResponse::chunks([
        sse("message_start", json!({"type": "message_start", "message": {"usage": {"input_tokens": 12}}})),
        sse(
            "content_block_start",
            json!({"type": "content_block_start", "index": 0,
                   "content_block": {"type": "tool_use", "id": "toolu_1", "name": "add", "input": {}}}),
        ),
        sse(
            "content_block_delta",
            json!({"type": "content_block_delta", "index": 0,
                   "delta": {"type": "input_json_delta", "partial_json": "{\"a\": 40, "}}),
        ),
        sse(
            "content_block_delta",
            json!({"type": "content_block_delta", "index": 0,
                   "delta": {"type": "input_json_delta", "partial_json": "\"b\": 2}"}}),
        ),
        sse("content_block_stop", json!({"type": "content_block_stop", "index": 0})),
        sse(
            "message_delta",
            json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}, "usage": {"output_tokens": 9}}),
        ),
        sse("message_stop", json!({"type": "message_stop"})),
    ]);
    let answer = ScriptedResponse::chunks([
        sse(
            "content_block_start",
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
        ),
        sse(
            "content_block_delta",
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "42"}}),
        ),
        sse(
            "message_delta",
            json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 1}}),
        ),
        sse("message_stop", json!({"type": "message_stop"})),
    ]);

    let transport = Arc::new(ScriptedTransport::new([tool_turn, answer]));
    let agent = AgentLoop::new(client(transport.clone()), Arc::new(tools()), "anthropic/claude-sonnet-4")
        .with_system_prompt("Use tools for arithmetic.");

    let mut conv = conversation("40 + 2?");
    let outcome = agent.run(&mut conv).await;

    assert!(outcome.is_done());
    assert_eq!(outcome.text, "42");
    assert_eq!(tool_results(&conv)[0].output, json!(42.0));

    let requests = transport.requests();
    assert!(requests[0].url.ends_with("/v1/messages"));
    assert_eq!(requests[0].body["model"], "claude-sonnet-4");
    assert_eq!(requests[0].body["system"], "Use tools for arithmetic.");
    // Tool result travels back as a user message with a tool_result block
    let messages = requests[1].body["messages"].as_array().unwrap();
    assert_eq!(messages[2]["role"], "user");
    assert_eq!(messages[2]["content"][0]["type"], "tool_result");
    assert_eq!(messages[2]["content"][0]["tool_use_id"], "toolu_1");
}

#[tokio::test]
async fn google_two_tool_rounds_keep_function_names() {
    let call = |name: &str, args: Value| {
        ScriptedResponse::sse([json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"functionCall": {"name": name, "args": args}}]},
                "finishReason": "STOP"
            }]
        })
        .to_string()])
    };
    let answer = ScriptedResponse::sse([json!({
        "candidates": [{"content": {"role": "model", "parts": [{"text": "3, after a nap"}]}, "finishReason": "STOP"}],
        "usageMetadata": {"promptTokenCount": 30, "candidatesTokenCount": 4, "totalTokenCount": 34}
    })
    .to_string()]);

    let transport = Arc::new(ScriptedTransport::new([
        call("add", json!({"a": 1, "b": 2})),
        call("sleep", json!({"ms": 0})),
        answer,
    ]));
    let agent = AgentLoop::new(client(transport.clone()), Arc::new(tools()), "google/gemini-2.0-flash");

    let mut conv = conversation("add 1 and 2, then rest");
    let outcome = agent.run(&mut conv).await;

    assert!(outcome.is_done());
    assert_eq!(outcome.turns, 3);
    assert_eq!(outcome.text, "3, after a nap");

    // Both rounds synthesize `call_0`; each result must still name its own function
    let results = tool_results(&conv);
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.call_id == "call_0" && !r.is_error));

    let requests = transport.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests[2].url.contains("/models/gemini-2.0-flash:streamGenerateContent"));
    let contents = requests[2].body["contents"].as_array().unwrap();
    assert_eq!(contents.len(), 5);
    assert_eq!(contents[1]["parts"][0]["functionCall"]["name"], "add");
    assert_eq!(contents[2]["parts"][0]["functionResponse"]["name"], "add");
    assert_eq!(contents[2]["parts"][0]["functionResponse"]["response"]["content"], json!(3.0));
    assert_eq!(contents[3]["parts"][0]["functionCall"]["name"], "sleep");
    assert_eq!(contents[4]["parts"][0]["functionResponse"]["name"], "sleep");
}

#[tokio::test]
async fn capability_mismatch_fails_without_network() {
    let transport = Arc::new(ScriptedTransport::new([text_reply("unused")]));
    let client = Arc::new(
        UnifiedClient::new(transport.clone()).with_provider(
            ProviderConfig::new("tiny", ProviderKind::OpenAiCompat).with_capabilities(switchboard_core::Capabilities {
                supports_tools: false,
                supports_images: false,
                context_window: 2048,
            }),
        ),
    );
    let agent = AgentLoop::new(client, Arc::new(tools()), "tiny-model");
    let mut conv = conversation("hi");
    let outcome = agent.run(&mut conv).await;

    assert!(matches!(outcome.failure(), Some(FailureReason::ProviderProtocol { .. })));
    assert_eq!(transport.open_count(), 0);
}

#[tokio::test]
async fn assistant_message_keeps_text_and_calls_in_order() {
    let mixed = ScriptedResponse::sse([
        chunk(json!({"content": "Let me add that."}), None),
        chunk(
            json!({"tool_calls": [{"index": 0, "id": "call_1", "type": "function",
                                   "function": {"name": "add", "arguments": "{\"a\":1,\"b\":1}"}}]}),
            None,
        ),
        chunk(json!({}), Some("tool_calls")),
        "[DONE]".to_string(),
    ]);
    let transport = Arc::new(ScriptedTransport::new([mixed, text_reply("2")]));
    let agent = AgentLoop::new(client(transport), Arc::new(tools()), "gpt-4o");

    let mut conv = conversation("1+1");
    agent.run(&mut conv).await;

    let assistant = &conv.messages()[1];
    assert!(matches!(&assistant.content[0], ContentBlock::Text { text } if text == "Let me add that."));
    assert!(matches!(&assistant.content[1], ContentBlock::ToolCall(call) if call.id == "call_1"));
}
