//! Built-in tools available to `switchboard chat`.

use std::time::Duration;

use serde_json::{Value, json};
use switchboard_core::{ToolError, ToolRegistry, ToolSpec};

/// Registry with the built-in tools; `timeout` bounds each invocation.
pub fn builtin_registry(timeout: Option<Duration>) -> ToolRegistry {
    let mut registry = match timeout {
        Some(limit) => ToolRegistry::new().with_timeout(limit),
        None => ToolRegistry::new(),
    };

    registry.register_fn(
        ToolSpec::new(
            "current_time",
            "Get the current date and time in UTC (RFC 3339)",
            json!({"type": "object", "properties": {}}),
        )
        .concurrency_safe(true),
        |_| async { Ok(json!(chrono::Utc::now().to_rfc3339())) },
    );

    registry.register_fn(
        ToolSpec::new(
            "read_file",
            "Read a UTF-8 text file",
            json!({
                "type": "object",
                "properties": {"path": {"type": "string", "description": "File path"}},
                "required": ["path"]
            }),
        )
        .concurrency_safe(true),
        |args: Value| async move {
            let path = string_arg(&args, "path", "read_file")?;
            tokio::fs::read_to_string(&path)
                .await
                .map(Value::String)
                .map_err(|e| ToolError::ExecutionFailed {
                    tool_name: "read_file".into(),
                    reason: format!("{path}: {e}"),
                })
        },
    );

    registry.register_fn(
        ToolSpec::new(
            "write_file",
            "Write text to a file, replacing its contents",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "File path"},
                    "content": {"type": "string", "description": "Text to write"}
                },
                "required": ["path", "content"]
            }),
        ),
        |args: Value| async move {
            let path = string_arg(&args, "path", "write_file")?;
            let content = string_arg(&args, "content", "write_file")?;
            tokio::fs::write(&path, content.as_bytes())
                .await
                .map_err(|e| ToolError::ExecutionFailed {
                    tool_name: "write_file".into(),
                    reason: format!("{path}: {e}"),
                })?;
            Ok::<_, ToolError>(json!({"path": path, "bytes_written": content.len()}))
        },
    );

    registry
}

fn string_arg(args: &Value, name: &str, tool: &str) -> Result<String, ToolError> {
    args[name]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ToolError::InvalidArguments(format!("{tool}: '{name}' must be a string")))
}
