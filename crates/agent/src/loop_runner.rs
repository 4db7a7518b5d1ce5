//! The agent loop implementation.

use std::sync::Arc;

use futures::StreamExt;
use switchboard_core::{
    CanonicalRequest, Conversation, Message, ProtocolError, SamplingParams, StopReason,
    StreamErrorKind, StreamEvent, ToolCall, ToolRegistry, Usage,
};
use switchboard_providers::UnifiedClient;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::executor::ToolExecutor;
use crate::state::{AgentOutcome, Completion, FailureReason, LoopState, PartialOutput};
use crate::stream_event::AgentEvent;

pub const DEFAULT_MAX_TURNS: u32 = 50;

/// Orchestrates model turns and tool execution over one conversation.
pub struct AgentLoop {
    /// Streaming client shared across sessions
    client: Arc<UnifiedClient>,

    /// Tool batches run here
    executor: ToolExecutor,

    /// Model identifier, optionally provider-prefixed
    model: String,

    system_prompt: Option<String>,

    sampling: SamplingParams,

    /// Maximum model calls per run
    max_turns: u32,

    /// Optional observer
    events: Option<mpsc::UnboundedSender<AgentEvent>>,
}

enum TurnEnd {
    Stop(StopReason, Option<String>),
    Failed(FailureReason),
    Canceled,
}

/// Everything one model turn produced.
struct TurnOutput {
    end: TurnEnd,
    text: String,
    calls: Vec<ToolCall>,
    usage: Option<Usage>,
}

fn partial_output(text: String, tool_calls: Vec<ToolCall>) -> Option<PartialOutput> {
    let partial = PartialOutput { text, tool_calls };
    (!partial.is_empty()).then_some(partial)
}

/// Bookkeeping for one run.
struct Run {
    state: LoopState,
    turns: u32,
    tool_calls_made: usize,
    usage: Usage,
    text: String,
    partial: Option<PartialOutput>,
    /// Calls awaiting execution
    pending: Vec<ToolCall>,
    /// Set when entering `TextTerminal`
    completion: Completion,
}

impl Run {
    fn into_outcome(self) -> AgentOutcome {
        AgentOutcome {
            state: self.state,
            turns: self.turns,
            tool_calls_made: self.tool_calls_made,
            usage: self.usage,
            text: self.text,
            partial: self.partial,
        }
    }
}

impl AgentLoop {
    /// Create a new agent loop.
    pub fn new(client: Arc<UnifiedClient>, tools: Arc<ToolRegistry>, model: impl Into<String>) -> Self {
        Self {
            client,
            executor: ToolExecutor::new(tools),
            model: model.into(),
            system_prompt: None,
            sampling: SamplingParams::default(),
            max_turns: DEFAULT_MAX_TURNS,
            events: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.sampling.temperature = Some(temperature);
        self
    }

    /// Set the default max tokens per model response.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.sampling.max_tokens = Some(max);
        self
    }

    /// Set the maximum number of model calls per run.
    pub fn with_max_turns(mut self, max: u32) -> Self {
        self.max_turns = max;
        self
    }

    /// Send every [`AgentEvent`] of each run to `sender`.
    pub fn with_event_sink(mut self, sender: mpsc::UnboundedSender<AgentEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Run until the model finishes, something fails, or the turn budget is spent.
    pub async fn run(&self, conversation: &mut Conversation) -> AgentOutcome {
        self.run_with_cancel(conversation, CancellationToken::new()).await
    }

    /// Like [`run`](Self::run), ending in `Canceled` once `cancel` fires.
    ///
    /// Messages are only ever appended. A canceled or failed model turn
    /// leaves no trace in `conversation`; its output is in
    /// [`AgentOutcome::partial`].
    pub async fn run_with_cancel(&self, conversation: &mut Conversation, cancel: CancellationToken) -> AgentOutcome {
        info!(
            conversation_id = %conversation.id,
            messages = conversation.len(),
            model = %self.model,
            "Starting agent run"
        );

        let mut run = Run {
            state: LoopState::Idle,
            turns: 0,
            tool_calls_made: 0,
            usage: Usage::default(),
            text: String::new(),
            partial: None,
            pending: conversation.unanswered_tool_calls(),
            completion: Completion::Clean,
        };

        let first = if run.pending.is_empty() {
            LoopState::AwaitingModel
        } else {
            debug!(calls = run.pending.len(), "Resuming with unanswered tool calls");
            LoopState::ToolsRequested
        };
        self.transition(&mut run, first);

        while !run.state.is_terminal() {
            let next = match run.state {
                LoopState::AwaitingModel => self.await_model(conversation, &cancel, &mut run).await,
                LoopState::TextTerminal => LoopState::Done {
                    completion: run.completion,
                },
                LoopState::ToolsRequested if cancel.is_cancelled() => LoopState::Canceled,
                LoopState::ToolsRequested => LoopState::ExecutingTools,
                LoopState::ExecutingTools => self.execute_tools(conversation, &cancel, &mut run).await,
                LoopState::Idle | LoopState::Done { .. } | LoopState::Failed { .. } | LoopState::Canceled => break,
            };
            self.transition(&mut run, next);
        }

        let outcome = run.into_outcome();
        info!(
            conversation_id = %conversation.id,
            state = %outcome.state,
            turns = outcome.turns,
            tool_calls = outcome.tool_calls_made,
            total_tokens = outcome.usage.total_tokens,
            "Agent run finished"
        );
        self.emit(AgentEvent::Finished {
            outcome: outcome.clone(),
        });
        outcome
    }

    async fn await_model(
        &self,
        conversation: &mut Conversation,
        cancel: &CancellationToken,
        run: &mut Run,
    ) -> LoopState {
        if cancel.is_cancelled() {
            return LoopState::Canceled;
        }
        if run.turns >= self.max_turns {
            warn!(
                conversation_id = %conversation.id,
                limit = self.max_turns,
                "Max turns reached without a final answer"
            );
            return LoopState::Failed {
                reason: FailureReason::MaxTurnsExceeded { limit: self.max_turns },
            };
        }
        run.turns += 1;

        let TurnOutput { end, text, calls, usage } = self.model_turn(conversation, cancel, run.turns).await;
        if let Some(usage) = &usage {
            run.usage.accumulate(usage);
        }

        match end {
            TurnEnd::Stop(StopReason::EndTurn, _) => {
                Self::append_text(conversation, run, text);
                run.completion = Completion::Clean;
                LoopState::TextTerminal
            }
            TurnEnd::Stop(StopReason::ToolUse, _) if calls.is_empty() => {
                run.partial = partial_output(text, calls);
                LoopState::Failed {
                    reason: FailureReason::ProviderProtocol {
                        message: "model stopped for tool use without requesting any tool".into(),
                    },
                }
            }
            TurnEnd::Stop(StopReason::ToolUse, _) => {
                debug!(turn = run.turns, tool_count = calls.len(), "Model requested tools");
                run.text = text.clone();
                conversation.push(Message::assistant_with_tool_calls(text, calls.clone()));
                run.pending = calls;
                LoopState::ToolsRequested
            }
            TurnEnd::Stop(reason @ (StopReason::MaxTokens | StopReason::ContentFilter), _) => {
                if !calls.is_empty() {
                    debug!(dropped = calls.len(), %reason, "Dropping tool calls of a cut-off turn");
                }
                Self::append_text(conversation, run, text);
                run.completion = if reason == StopReason::MaxTokens {
                    Completion::Truncated
                } else {
                    Completion::Filtered
                };
                LoopState::TextTerminal
            }
            TurnEnd::Stop(StopReason::Error, raw) => {
                run.partial = partial_output(text, calls);
                LoopState::Failed {
                    reason: FailureReason::ProviderProtocol {
                        message: ProtocolError::UnknownStopReason(raw.unwrap_or_else(|| "none".into()))
                            .to_string(),
                    },
                }
            }
            TurnEnd::Failed(reason) => {
                run.partial = partial_output(text, calls);
                LoopState::Failed { reason }
            }
            TurnEnd::Canceled => {
                run.partial = partial_output(text, calls);
                LoopState::Canceled
            }
        }
    }

    /// Stream one model call and collect its output.
    async fn model_turn(&self, conversation: &Conversation, cancel: &CancellationToken, turn: u32) -> TurnOutput {
        let mut request = CanonicalRequest::new(self.model.clone(), conversation.messages().to_vec())
            .with_tools(self.executor.registry().specs())
            .with_sampling(self.sampling.clone());
        if let Some(system) = &self.system_prompt {
            request = request.with_system(system.clone());
        }

        debug!(turn, messages = conversation.len(), "Requesting model turn");
        let mut stream = self.client.generate_with_cancel(request, cancel.child_token());

        let mut text = String::new();
        let mut calls = Vec::new();
        let mut usage = None;

        while let Some(event) = stream.next().await {
            self.emit(AgentEvent::Stream {
                turn,
                event: event.clone(),
            });

            let end = match event {
                StreamEvent::TextDelta { text: delta } => {
                    text.push_str(&delta);
                    None
                }
                StreamEvent::ToolCallStart { .. } | StreamEvent::ToolCallDelta { .. } => None,
                StreamEvent::ToolCallEnd { call } => {
                    calls.push(call);
                    None
                }
                StreamEvent::Usage(turn_usage) => {
                    usage = Some(turn_usage);
                    None
                }
                StreamEvent::Stop { reason, raw } => Some(TurnEnd::Stop(reason, raw)),
                StreamEvent::Error {
                    kind,
                    message,
                    fatal: false,
                    ..
                } => {
                    warn!(turn, ?kind, message = %message, "Provider stream warning");
                    None
                }
                StreamEvent::Error {
                    kind,
                    message,
                    recoverable,
                    ..
                } => Some(TurnEnd::Failed(match kind {
                    StreamErrorKind::Protocol => FailureReason::ProviderProtocol { message },
                    StreamErrorKind::Transport => FailureReason::Transport { message, recoverable },
                })),
                StreamEvent::Canceled => Some(TurnEnd::Canceled),
            };

            if let Some(end) = end {
                return TurnOutput { end, text, calls, usage };
            }
        }

        TurnOutput {
            end: TurnEnd::Failed(FailureReason::ProviderProtocol {
                message: "stream ended without a terminal event".into(),
            }),
            text,
            calls,
            usage,
        }
    }

    /// Run pending calls batch by batch, appending results in call order.
    async fn execute_tools(
        &self,
        conversation: &mut Conversation,
        cancel: &CancellationToken,
        run: &mut Run,
    ) -> LoopState {
        let calls = std::mem::take(&mut run.pending);

        for batch in self.executor.plan(&calls) {
            if cancel.is_cancelled() {
                return LoopState::Canceled;
            }
            let results = self.executor.run_batch(&batch).await;
            if cancel.is_cancelled() {
                debug!(discarded = results.len(), "Discarding tool results after cancellation");
                return LoopState::Canceled;
            }

            for (call, result) in batch.iter().zip(results) {
                conversation.push(Message::tool_result(result.clone()));
                run.tool_calls_made += 1;
                self.emit(AgentEvent::ToolResult {
                    name: call.name.clone(),
                    result,
                });
            }
        }

        LoopState::AwaitingModel
    }

    /// Empty text appends nothing.
    fn append_text(conversation: &mut Conversation, run: &mut Run, text: String) {
        if !text.is_empty() {
            conversation.push(Message::assistant(text.clone()));
        }
        run.text = text;
    }

    fn transition(&self, run: &mut Run, next: LoopState) {
        debug!(from = %run.state, to = %next, turn = run.turns, "Agent state transition");
        let from = std::mem::replace(&mut run.state, next.clone());
        self.emit(AgentEvent::StateChanged { from, to: next });
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(sender) = &self.events {
            // A dropped receiver only means nobody is watching
            let _ = sender.send(event);
        }
    }
}
