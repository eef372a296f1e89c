/// Current Time Tool
///
/// Reports the current UTC time, RFC 3339 by default or formatted with a
/// caller-supplied strftime pattern.

use std::fmt::Write;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Value, json};

use crate::core::error::Result;
use crate::core::registry::{ToolHandler, ToolMetadata, ToolRegistry, ToolResult};

pub fn register(_registry: &Arc<ToolRegistry>) -> Result<Vec<ToolMetadata>> {
    let tool = ToolMetadata::new("get_current_time", "utility")
        .with_description("Get the current UTC time.")
        .with_input_schema(json!({
            "type": "object",
            "properties": {
                "format": {
                    "type": "string",
                    "description": "strftime pattern, e.g. \"%Y-%m-%d %H:%M\". Defaults to RFC 3339."
                }
            }
        }))
        .with_handler(ToolHandler::asynchronous(get_current_time))
        .at(file!(), line!());

    Ok(vec![tool])
}

// @tool(name = "get_current_time", category = "utility")
async fn get_current_time(args: Value) -> ToolResult {
    let now = Utc::now();

    let time = match args.get("format") {
        None | Some(Value::Null) => now.to_rfc3339(),
        Some(Value::String(pattern)) => {
            let mut out = String::new();
            // chrono reports unknown specifiers as a formatting error
            write!(out, "{}", now.format(pattern))
                .map_err(|_| format!("Invalid time format: {pattern}"))?;
            out
        }
        Some(_) => return Err("Parameter 'format' must be a string".to_string()),
    };

    Ok(json!({
        "time": time,
        "timezone": "UTC",
        "timestamp": now.timestamp(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn defaults_to_rfc3339() {
        let result = get_current_time(json!({})).await.unwrap();
        let time = result["time"].as_str().unwrap();
        let parsed = DateTime::parse_from_rfc3339(time).unwrap();
        assert_eq!(parsed.timestamp(), result["timestamp"].as_i64().unwrap());
        assert_eq!(result["timezone"], json!("UTC"));
    }

    #[tokio::test]
    async fn honours_custom_format() {
        let result = get_current_time(json!({ "format": "%Y" })).await.unwrap();
        let year = result["time"].as_str().unwrap();
        assert_eq!(year.len(), 4);
        assert!(year.chars().all(|c| c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn rejects_bad_format() {
        assert!(get_current_time(json!({ "format": "%Q" })).await.is_err());
        assert!(get_current_time(json!({ "format": 12 })).await.is_err());
    }

    #[test]
    fn registers_as_async() {
        let registry = Arc::new(ToolRegistry::new(
            Arc::new(crate::core::config_store::JsonConfigStore::in_memory()),
            true,
        ));
        let tools = register(&registry).unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(
            tools[0].execution_mode,
            crate::core::registry::ExecutionMode::Async
        );
    }
}
