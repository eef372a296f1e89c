/// Tool Configuration Management
///
/// MCP tools that inspect and change the registry at runtime: listing
/// persisted configuration, per-tool status, category views, enabling and
/// disabling tools, reloading the configuration file, editing config values
/// and validating the registry.
///
/// Handlers hold a weak reference to the registry they manage. The mutating
/// tools are in the privileged set and only run for authorized callers.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Value, json};

use crate::core::discovery::validate_registry;
use crate::core::error::Result;
use crate::core::registry::{ToolHandler, ToolMetadata, ToolRegistry, ToolResult};

const CATEGORY: &str = "config";

type ManagementFn = fn(&ToolRegistry, Value) -> ToolResult;

fn tool(
    registry: &Arc<ToolRegistry>,
    name: &str,
    description: &str,
    input_schema: Value,
    handler: ManagementFn,
) -> ToolMetadata {
    let registry = Arc::downgrade(registry);
    ToolMetadata::new(name, CATEGORY)
        .with_description(description)
        .with_input_schema(input_schema)
        .with_handler(ToolHandler::sync(move |args| {
            let registry = registry
                .upgrade()
                .ok_or_else(|| "Tool registry is no longer available".to_string())?;
            handler(&registry, args)
        }))
}

fn name_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "name": { "type": "string", "description": description }
        },
        "required": ["name"]
    })
}

pub fn register(registry: &Arc<ToolRegistry>) -> Result<Vec<ToolMetadata>> {
    Ok(vec![
        tool(
            registry,
            "get_tool_configs",
            "List the persisted configuration of every tool with summary statistics.",
            json!({ "type": "object" }),
            get_tool_configs,
        )
        .at(file!(), line!()),
        tool(
            registry,
            "get_tool_status",
            "Show how a tool's enabled state is derived. Without a name, reports every tool.",
            json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string", "description": "Tool name" }
                }
            }),
            get_tool_status,
        )
        .at(file!(), line!()),
        tool(
            registry,
            "get_tools_by_category",
            "List tools grouped by category, or the tools of one category.",
            json!({
                "type": "object",
                "properties": {
                    "category": { "type": "string", "description": "Category to list" }
                }
            }),
            get_tools_by_category,
        )
        .at(file!(), line!()),
        tool(
            registry,
            "enable_tool",
            "Enable a tool and persist the change.",
            name_schema("Tool to enable"),
            enable_tool,
        )
        .at(file!(), line!()),
        tool(
            registry,
            "disable_tool",
            "Disable a tool and persist the change.",
            name_schema("Tool to disable"),
            disable_tool,
        )
        .at(file!(), line!()),
        tool(
            registry,
            "toggle_tool",
            "Flip a tool between enabled and disabled.",
            name_schema("Tool to toggle"),
            toggle_tool,
        )
        .at(file!(), line!()),
        tool(
            registry,
            "reload_config",
            "Re-read the tool configuration file and apply the persisted enabled flags.",
            json!({ "type": "object" }),
            reload_config,
        )
        .at(file!(), line!()),
        tool(
            registry,
            "update_tool_config",
            "Merge values into a tool's configuration and persist them.",
            json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string", "description": "Tool to configure" },
                    "config": { "type": "object", "description": "Values to merge" }
                },
                "required": ["name", "config"]
            }),
            update_tool_config,
        )
        .at(file!(), line!()),
        tool(
            registry,
            "validate_tools",
            "Check every registered tool for a handler and a description.",
            json!({ "type": "object" }),
            validate_tools,
        )
        .at(file!(), line!()),
    ])
}

fn required_str<'a>(args: &'a Value, key: &str) -> std::result::Result<&'a str, String> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("Missing required parameter: {key}"))
}

fn state_change(registry: &ToolRegistry, name: &str, changed: bool) -> ToolResult {
    if !changed {
        return Err(format!("Unknown tool: {name}"));
    }
    Ok(json!({
        "tool": name,
        "enabled": registry.is_enabled(name),
    }))
}

// @tool
fn get_tool_configs(registry: &ToolRegistry, _args: Value) -> ToolResult {
    let store = registry.store();
    Ok(json!({
        "tools": store.all(),
        "stats": store.stats(),
    }))
}

// @tool
fn get_tool_status(registry: &ToolRegistry, args: Value) -> ToolResult {
    match args.get("name").and_then(Value::as_str) {
        Some(name) => registry
            .status(name)
            .map(|status| json!(status))
            .ok_or_else(|| format!("Unknown tool: {name}")),
        None => {
            let statuses: Vec<_> = registry
                .list_all()
                .iter()
                .filter_map(|tool| registry.status(&tool.name))
                .collect();
            Ok(json!({ "tools": statuses }))
        }
    }
}

// @tool
fn get_tools_by_category(registry: &ToolRegistry, args: Value) -> ToolResult {
    let summary = |tool: &ToolMetadata| {
        json!({
            "name": tool.name,
            "description": tool.description,
            "enabled": registry.is_enabled(&tool.name),
            "source": tool.source_location,
        })
    };

    if let Some(category) = args.get("category").and_then(Value::as_str) {
        let tools: Vec<Value> = registry.list_by_category(category).iter().map(&summary).collect();
        return Ok(json!({ "category": category, "tools": tools }));
    }

    let categories: BTreeMap<String, Vec<Value>> = registry
        .categories()
        .into_iter()
        .map(|category| {
            let tools = registry.list_by_category(&category).iter().map(&summary).collect();
            (category, tools)
        })
        .collect();
    Ok(json!({ "categories": categories }))
}

// @tool
fn enable_tool(registry: &ToolRegistry, args: Value) -> ToolResult {
    let name = required_str(&args, "name")?;
    let changed = registry.enable(name).map_err(|e| e.to_string())?;
    state_change(registry, name, changed)
}

// @tool
fn disable_tool(registry: &ToolRegistry, args: Value) -> ToolResult {
    let name = required_str(&args, "name")?;
    let changed = registry.disable(name).map_err(|e| e.to_string())?;
    state_change(registry, name, changed)
}

// @tool
fn toggle_tool(registry: &ToolRegistry, args: Value) -> ToolResult {
    let name = required_str(&args, "name")?;
    let changed = registry.toggle(name).map_err(|e| e.to_string())?;
    state_change(registry, name, changed)
}

// @tool
fn reload_config(registry: &ToolRegistry, _args: Value) -> ToolResult {
    let updated = registry.reload_config().map_err(|e| e.to_string())?;
    Ok(json!({
        "reloaded": true,
        "updated_tools": updated,
        "enabled_tools": registry.list_enabled().len(),
    }))
}

// @tool
fn update_tool_config(registry: &ToolRegistry, args: Value) -> ToolResult {
    let name = required_str(&args, "name")?;
    let config = args
        .get("config")
        .and_then(Value::as_object)
        .cloned()
        .ok_or_else(|| "Parameter 'config' must be an object".to_string())?;

    if !registry.update_tool_config(name, config).map_err(|e| e.to_string())? {
        return Err(format!("Unknown tool: {name}"));
    }
    Ok(json!({
        "tool": name,
        "config": registry.tool_config(name),
    }))
}

// @tool
fn validate_tools(registry: &ToolRegistry, _args: Value) -> ToolResult {
    let report = validate_registry(registry);
    Ok(json!({
        "valid": report.is_valid(),
        "report": report,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config_store::{JsonConfigStore, ToolConfigStore};
    use crate::core::discovery::count_markers;
    use crate::core::router::ToolRouter;
    use tempfile::TempDir;

    fn setup(store: Arc<dyn ToolConfigStore>) -> (Arc<ToolRegistry>, ToolRouter) {
        let registry = Arc::new(ToolRegistry::new(store, true));
        for tool in register(&registry).unwrap() {
            registry.register(tool).unwrap();
        }
        registry
            .register(
                ToolMetadata::new("search", "search")
                    .with_description("Search")
                    .with_handler(ToolHandler::sync(Ok)),
            )
            .unwrap();
        (registry.clone(), ToolRouter::new(registry))
    }

    fn in_memory() -> (Arc<ToolRegistry>, ToolRouter) {
        setup(Arc::new(JsonConfigStore::in_memory()))
    }

    #[test]
    fn every_tool_has_a_marker() {
        let registry = Arc::new(ToolRegistry::new(Arc::new(JsonConfigStore::in_memory()), true));
        let source = include_str!("management.rs");
        assert_eq!(count_markers(source), register(&registry).unwrap().len());
    }

    #[tokio::test]
    async fn disable_and_enable_round_trip() {
        let (registry, router) = in_memory();

        let result = router.route("disable_tool", json!({ "name": "search" })).await.unwrap();
        assert_eq!(result, json!({ "tool": "search", "enabled": false }));
        assert!(!registry.is_enabled("search"));
        assert!(!registry.store().is_enabled("search"));

        let result = router.route("enable_tool", json!({ "name": "search" })).await.unwrap();
        assert_eq!(result["enabled"], json!(true));
        assert!(registry.is_enabled("search"));
    }

    #[tokio::test]
    async fn toggle_flips_state() {
        let (registry, router) = in_memory();
        router.route("toggle_tool", json!({ "name": "search" })).await.unwrap();
        assert!(!registry.is_enabled("search"));
        router.route("toggle_tool", json!({ "name": "search" })).await.unwrap();
        assert!(registry.is_enabled("search"));
    }

    #[tokio::test]
    async fn state_changes_reject_unknown_or_missing_names() {
        let (_, router) = in_memory();
        let err = router.route("enable_tool", json!({ "name": "ghost" })).await.unwrap_err();
        assert!(err.to_string().contains("Unknown tool: ghost"));
        let err = router.route("disable_tool", json!({})).await.unwrap_err();
        assert!(err.to_string().contains("Missing required parameter: name"));
    }

    #[tokio::test]
    async fn status_and_configs_report_registry_state() {
        let (registry, router) = in_memory();
        registry.disable("search").unwrap();

        let status = router.route("get_tool_status", json!({ "name": "search" })).await.unwrap();
        assert_eq!(status["local_enabled"], json!(false));
        assert_eq!(status["persisted_enabled"], json!(false));
        assert_eq!(status["enabled"], json!(false));
        assert_eq!(status["dependencies"], json!([]));

        let all = router.route("get_tool_status", json!({})).await.unwrap();
        assert_eq!(all["tools"].as_array().unwrap().len(), registry.len());

        let configs = router.route("get_tool_configs", json!({})).await.unwrap();
        assert_eq!(configs["tools"]["search"]["enabled"], json!(false));
        assert_eq!(configs["stats"]["total_tools"], json!(registry.len()));
        assert_eq!(configs["stats"]["disabled_tools"], json!(1));
    }

    #[tokio::test]
    async fn category_views() {
        let (_, router) = in_memory();

        let search = router
            .route("get_tools_by_category", json!({ "category": "search" }))
            .await
            .unwrap();
        assert_eq!(search["tools"][0]["name"], json!("search"));
        assert_eq!(search["tools"][0]["source"], Value::Null);

        let all = router.route("get_tools_by_category", json!({})).await.unwrap();
        assert_eq!(all["categories"]["config"].as_array().unwrap().len(), 9);
        assert!(
            all["categories"]["config"][0]["source"]["file"]
                .as_str()
                .unwrap()
                .ends_with("management.rs")
        );
        assert_eq!(all["categories"]["search"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn each_tool_records_its_own_line() {
        let registry = Arc::new(ToolRegistry::new(Arc::new(JsonConfigStore::in_memory()), true));
        let lines: std::collections::HashSet<u32> = register(&registry)
            .unwrap()
            .iter()
            .filter_map(|tool| tool.source_location.as_ref().map(|loc| loc.line))
            .collect();
        assert_eq!(lines.len(), 9);
    }

    #[tokio::test]
    async fn update_tool_config_merges_values() {
        let (registry, router) = in_memory();
        let result = router
            .route(
                "update_tool_config",
                json!({ "name": "search", "config": { "limit": 5 } }),
            )
            .await
            .unwrap();
        assert_eq!(result["config"], json!({ "limit": 5 }));
        assert_eq!(
            registry.store().get_tool_config("search").unwrap().config.get("limit"),
            Some(&json!(5))
        );

        let err = router
            .route("update_tool_config", json!({ "name": "search", "config": 3 }))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("must be an object"));
    }

    #[tokio::test]
    async fn reload_picks_up_external_edits() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tool_config.json");
        let store = Arc::new(JsonConfigStore::open(&path).unwrap());
        let (registry, router) = setup(store);
        assert!(registry.is_enabled("search"));

        let mut file: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        file["tools"]["search"]["enabled"] = json!(false);
        std::fs::write(&path, serde_json::to_string_pretty(&file).unwrap()).unwrap();

        let result = router.route("reload_config", json!({})).await.unwrap();
        assert_eq!(result["reloaded"], json!(true));
        assert!(!registry.is_enabled("search"));
    }

    #[tokio::test]
    async fn validate_tools_reports_issues() {
        let (registry, router) = in_memory();
        registry
            .register(ToolMetadata::new("stub", "misc"))
            .unwrap();

        let result = router.route("validate_tools", json!({})).await.unwrap();
        assert_eq!(result["valid"], json!(false));
        let issues = result["report"]["issues"].as_array().unwrap();
        assert_eq!(issues.len(), 2);
    }

    #[test]
    fn handlers_do_not_keep_registry_alive() {
        let (registry, router) = in_memory();
        drop(router);
        let weak = Arc::downgrade(&registry);
        drop(registry);
        assert!(weak.upgrade().is_none());
    }
}
