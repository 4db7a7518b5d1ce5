//! `switchboard chat`: Single-message or interactive agent session.

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use switchboard_agent::{AgentEvent, AgentLoop, AgentOutcome, Completion, LoopState};
use switchboard_config::AppConfig;
use switchboard_core::{Conversation, Message, StreamEvent, ToolResult};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{build_client, tools::builtin_registry};

pub async fn run(message: Option<String>, model: Option<String>, json: bool) -> anyhow::Result<()> {
    let config = AppConfig::load().context("Failed to load config")?;
    let model = model.unwrap_or_else(|| config.default_model.clone());

    warn_missing_key(&config);

    let client = Arc::new(build_client(&config)?);
    let tools = Arc::new(builtin_registry(config.agent.tool_timeout()));

    let (tx, rx) = mpsc::unbounded_channel();
    let mut agent = AgentLoop::new(client, tools, &model)
        .with_sampling(config.sampling())
        .with_max_turns(config.agent.max_turns)
        .with_event_sink(tx);
    if let Some(prompt) = &config.system_prompt {
        agent = agent.with_system_prompt(prompt.clone());
    }

    let printer = tokio::spawn(print_events(rx, json));

    let mut conv = Conversation::new();
    if let Some(msg) = message {
        // Single message mode
        conv.push(Message::user(msg));
        let outcome = run_once(&agent, &mut conv).await;
        drop(agent);
        printer.await.context("Event printer failed")?;
        if let LoopState::Failed { reason } = &outcome.state {
            anyhow::bail!("{reason}");
        }
        return Ok(());
    }

    // Interactive mode
    eprintln!();
    eprintln!("  Switchboard: interactive mode");
    eprintln!("  Provider:  {}", config.default_provider);
    eprintln!("  Model:     {model}");
    eprintln!("  Tools:     current_time, read_file, write_file");
    eprintln!("  Ctrl+C cancels a running turn; type 'exit' to quit.");
    eprintln!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("  You > ");
        std::io::stderr().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }

        let closed = close_interrupted_calls(&mut conv);
        if closed > 0 {
            eprintln!("  [{closed} interrupted tool call(s) marked as canceled]");
        }
        conv.push(Message::user(line));
        run_once(&agent, &mut conv).await;
    }

    drop(agent);
    printer.await.context("Event printer failed")?;
    eprintln!();
    Ok(())
}

/// One agent run; Ctrl+C cancels it.
async fn run_once(agent: &AgentLoop, conv: &mut Conversation) -> AgentOutcome {
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };
    let outcome = agent.run_with_cancel(conv, cancel).await;
    watcher.abort();
    outcome
}

/// Answer every tool call a canceled run left open with an error result, so
/// the model learns it was interrupted instead of the tool running again.
fn close_interrupted_calls(conv: &mut Conversation) -> usize {
    let pending = conv.unanswered_tool_calls();
    for call in &pending {
        conv.push(Message::tool_result(ToolResult::failure(
            call.id.clone(),
            format!("'{}' was canceled by the user before it completed", call.name),
            0,
        )));
    }
    pending.len()
}

fn warn_missing_key(config: &AppConfig) {
    let Some(provider) = config.providers.get(&config.default_provider) else {
        return;
    };
    if provider.api_key.is_none() {
        eprintln!();
        eprintln!("  WARNING: no API key for provider '{}'.", config.default_provider);
        eprintln!("  Set {} or add api_key under [providers.{}] in", provider.key_variable(), config.default_provider);
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
    }
}

async fn print_events(mut rx: mpsc::UnboundedReceiver<AgentEvent>, json: bool) {
    while let Some(event) = rx.recv().await {
        if json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "Failed to serialize agent event"),
            }
            continue;
        }

        match event {
            AgentEvent::Stream { event, .. } => match event {
                StreamEvent::TextDelta { text } => {
                    print!("{text}");
                    let _ = std::io::stdout().flush();
                }
                StreamEvent::ToolCallEnd { call } => {
                    eprintln!("\n  [tool] {}({})", call.name, call.arguments);
                }
                StreamEvent::Error { message, fatal: false, .. } => {
                    eprintln!("\n  [warning] {message}");
                }
                _ => {}
            },
            AgentEvent::ToolResult { name, result } => {
                let status = if result.is_error { "error" } else { "ok" };
                eprintln!("  [tool] {name} → {status} ({} ms)", result.duration_ms);
            }
            AgentEvent::Finished { outcome } => report(&outcome),
            AgentEvent::StateChanged { .. } => {}
        }
    }
}

/// How a finished answer was cut short, if it was.
fn completion_note(completion: Completion) -> Option<&'static str> {
    match completion {
        Completion::Clean => None,
        Completion::Truncated => Some("truncated: the model hit its token limit"),
        Completion::Filtered => Some("filtered: the provider withheld part of the answer"),
    }
}

fn report(outcome: &AgentOutcome) {
    println!();
    match &outcome.state {
        LoopState::Done { completion } => {
            if let Some(note) = completion_note(*completion) {
                eprintln!("  [{note}]");
            }
        }
        LoopState::Canceled => eprintln!("  [canceled]"),
        LoopState::Failed { reason } => eprintln!("  [error] {reason}"),
        other => eprintln!("  [stopped in state {other}]"),
    }
    eprintln!(
        "  [{} turn(s), {} tool call(s), {} tokens]",
        outcome.turns, outcome.tool_calls_made, outcome.usage.total_tokens
    );
}
