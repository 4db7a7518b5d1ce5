//! Tool batch execution.
//!
//! The calls of one turn are split into consecutive batches: a run of
//! concurrency-safe calls forms one batch and executes simultaneously, any
//! other call is a batch of its own. Results always come back in call order.

use std::sync::Arc;

use futures::future::join_all;
use switchboard_core::{ToolCall, ToolRegistry, ToolResult};
use tracing::debug;

/// Runs tool calls against a shared registry.
#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Partition `calls` into batches, preserving order.
    pub fn plan(&self, calls: &[ToolCall]) -> Vec<Vec<ToolCall>> {
        let mut batches: Vec<Vec<ToolCall>> = Vec::new();
        let mut safe_run: Vec<ToolCall> = Vec::new();

        for call in calls {
            if self.registry.is_concurrency_safe(&call.name) {
                safe_run.push(call.clone());
            } else {
                if !safe_run.is_empty() {
                    batches.push(std::mem::take(&mut safe_run));
                }
                batches.push(vec![call.clone()]);
            }
        }
        if !safe_run.is_empty() {
            batches.push(safe_run);
        }
        batches
    }

    /// Execute one batch. Results are in the batch's call order whatever
    /// order the handlers finish in.
    pub async fn run_batch(&self, batch: &[ToolCall]) -> Vec<ToolResult> {
        debug!(
            calls = batch.len(),
            tools = ?batch.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            "Executing tool batch"
        );
        join_all(batch.iter().map(|call| self.registry.invoke(call))).await
    }
}
