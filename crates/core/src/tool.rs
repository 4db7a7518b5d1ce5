//! Tool registry: the seam between the core and caller-supplied capabilities.
//!
//! Collaborators (a CLI, a chat bot) register concrete handlers; the agent
//! loop only ever sees [`ToolSpec`]s and calls [`ToolRegistry::invoke`].
//! Every failure mode of a handler is folded into an error-flagged
//! [`ToolResult`], so a misbehaving tool can never abort a run.

use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ToolError;

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID within a turn (matches the provider's id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Finalized arguments
    pub arguments: Value,
}

/// The result of a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// Handler output, or an error description when `is_error` is set
    pub output: Value,

    #[serde(default)]
    pub is_error: bool,

    /// Wall-clock execution time
    #[serde(default)]
    pub duration_ms: u64,
}

impl ToolResult {
    pub fn success(call_id: impl Into<String>, output: Value, duration_ms: u64) -> Self {
        Self {
            call_id: call_id.into(),
            output,
            is_error: false,
            duration_ms,
        }
    }

    pub fn failure(call_id: impl Into<String>, error: impl std::fmt::Display, duration_ms: u64) -> Self {
        Self {
            call_id: call_id.into(),
            output: Value::String(error.to_string()),
            is_error: true,
            duration_ms,
        }
    }

    /// Output rendered as text for providers that only accept strings.
    pub fn output_text(&self) -> String {
        match &self.output {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// What the model is told about a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's input
    pub input_schema: Value,

    /// Whether calls may run simultaneously with other concurrency-safe calls
    #[serde(default)]
    pub concurrency_safe: bool,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            concurrency_safe: false,
        }
    }

    /// Mark the tool as safe to run alongside other concurrency-safe calls.
    pub fn concurrency_safe(mut self, safe: bool) -> Self {
        self.concurrency_safe = safe;
        self
    }

    /// Check that arguments are an object carrying every `required` property.
    fn check_arguments(&self, arguments: &Value) -> Result<(), ToolError> {
        let Some(object) = arguments.as_object() else {
            return Err(ToolError::InvalidArguments(format!(
                "expected a JSON object, got {arguments}"
            )));
        };

        let missing: Vec<&str> = self.input_schema["required"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .filter(|key| !object.contains_key(*key))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ToolError::InvalidArguments(format!(
                "missing required field(s): {}",
                missing.join(", ")
            )))
        }
    }
}

/// The executable side of a tool.
///
/// Handlers are responsible for their own internal concurrency safety; the
/// spec's `concurrency_safe` flag only tells the agent loop whether it may
/// overlap calls.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Value) -> Result<Value, ToolError>;
}

/// Adapts an async closure into a [`ToolHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ToolError>> + Send,
{
    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        (self.0)(arguments).await
    }
}

struct RegisteredTool {
    spec: ToolSpec,
    handler: Arc<dyn ToolHandler>,
}

/// A registry of available tools.
///
/// Read-mostly after start-up; share it across sessions behind an `Arc`.
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
    timeout: Option<Duration>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
            timeout: None,
        }
    }

    /// Bound every invocation; an overrun becomes an error-flagged result.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, spec: ToolSpec, handler: Arc<dyn ToolHandler>) {
        let name = spec.name.clone();
        if self.tools.contains_key(&name) {
            warn!(tool = %name, "Replacing previously registered tool");
        }
        self.tools.insert(name, RegisteredTool { spec, handler });
    }

    /// Register an async closure as a tool handler.
    pub fn register_fn<F, Fut>(&mut self, spec: ToolSpec, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        self.register(spec, Arc::new(FnHandler(handler)));
    }

    /// Get a tool spec by name.
    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name).map(|t| &t.spec)
    }

    /// All specs, ordered by name (sent to the model with each request).
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|t| t.spec.clone()).collect()
    }

    /// Unknown tools are treated as unsafe.
    pub fn is_concurrency_safe(&self, name: &str) -> bool {
        self.get(name).is_some_and(|s| s.concurrency_safe)
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool call. Never fails: errors become error-flagged results.
    pub async fn invoke(&self, call: &ToolCall) -> ToolResult {
        let start = Instant::now();
        let outcome = self.run(call).await;
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        match outcome {
            Ok(output) => {
                debug!(tool = %call.name, call_id = %call.id, duration_ms, "Tool completed");
                ToolResult::success(&call.id, output, duration_ms)
            }
            Err(e) => {
                warn!(tool = %call.name, call_id = %call.id, error = %e, "Tool execution failed");
                ToolResult::failure(&call.id, e, duration_ms)
            }
        }
    }

    async fn run(&self, call: &ToolCall) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .get(&call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;
        tool.spec.check_arguments(&call.arguments)?;

        let execution = AssertUnwindSafe(tool.handler.call(call.arguments.clone())).catch_unwind();

        let caught = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, execution)
                .await
                .map_err(|_| ToolError::Timeout {
                    tool_name: call.name.clone(),
                    timeout_secs: limit.as_secs(),
                })?,
            None => execution.await,
        };

        caught.map_err(|payload| ToolError::Panicked(panic_message(payload.as_ref())))?
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".into()
    }
}
