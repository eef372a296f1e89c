/// Echo Tool Implementation
///
/// The echo tool takes a message parameter and returns it, optionally with a
/// configurable prefix. The prefix lives in the tool's config bag and can be
/// changed at runtime through `update_tool_config`.

use std::sync::{Arc, Weak};

use serde_json::{Value, json};

use crate::core::error::Result;
use crate::core::registry::{ToolHandler, ToolMetadata, ToolRegistry, ToolResult};

/// Describe the echo tool.
///
/// # Arguments
/// * `registry` - Registry the tool is being loaded into; the handler keeps a
///   weak reference to it for config lookups
pub fn register(registry: &Arc<ToolRegistry>) -> Result<Vec<ToolMetadata>> {
    let registry = Arc::downgrade(registry);
    let tool = ToolMetadata::new("echo", "utility")
        .with_description("Echo a message back to the client.")
        .with_input_schema(json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "The message to echo"
                }
            },
            "required": ["message"]
        }))
        .with_config(json!({ "prefix": "" }))
        .with_handler(ToolHandler::sync(move |args| echo(&registry, args)))
        .at(file!(), line!());

    Ok(vec![tool])
}

// @tool(name = "echo", category = "utility")
fn echo(registry: &Weak<ToolRegistry>, args: Value) -> ToolResult {
    let message = args
        .get("message")
        .and_then(Value::as_str)
        .ok_or_else(|| "Missing required parameter: message".to_string())?;

    let prefix = registry
        .upgrade()
        .and_then(|registry| registry.tool_config("echo"))
        .and_then(|config| config.get("prefix").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_default();

    Ok(json!({ "result": format!("{prefix}{message}") }))
}
