/// MCP Protocol Handler
///
/// JSON-RPC 2.0 request/response structures and the transport-independent
/// dispatcher for the MCP methods the server supports:
/// - `initialize`: protocol version, capabilities and server identity
/// - `tools/list`: definitions of the effectively enabled tools
/// - `tools/call`: auth check for privileged tools, enablement check, dispatch
/// - `notifications/*`: accepted silently, no response
/// - any other request without an `id` runs as a notification: no response
/// - `ping`: empty result
///
/// The handler is stateless per request. It does not enforce that
/// `initialize` arrives first.

use std::collections::HashSet;
use std::sync::Arc;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::core::auth::{AuthMiddleware, RequestContext};
use crate::core::error::{ToolError, codes};
use crate::core::registry::ToolRegistry;
use crate::core::router::{ToolRouter, panic_message};

/// MCP protocol revision announced in `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Tools that mutate registry or configuration state.
pub const DEFAULT_PRIVILEGED_TOOLS: &[&str] = &[
    "enable_tool",
    "disable_tool",
    "toggle_tool",
    "reload_config",
    "update_tool_config",
];

/// JSON-RPC 2.0 request structure for MCP protocol.
///
/// `id` is `None` for notifications.
#[derive(Deserialize, Debug, Clone)]
pub struct MCPRequest {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 response structure for MCP protocol.
///
/// Exactly one of `result` and `error` is present.
#[derive(Serialize, Debug, Clone)]
pub struct MCPResponse {
    pub jsonrpc: String,
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<MCPError>,
}

/// JSON-RPC 2.0 error structure.
#[derive(Serialize, Debug, Clone)]
pub struct MCPError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl MCPResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(MCPError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    pub fn from_tool_error(id: Option<Value>, err: &ToolError) -> Self {
        Self::error(id, err.rpc_code(), err.to_string())
    }
}

/// Server identity reported by `initialize`.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

/// Parameters of `tools/call`.
#[derive(Deserialize, Debug)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

pub struct ProtocolHandler {
    registry: Arc<ToolRegistry>,
    router: ToolRouter,
    auth: Arc<dyn AuthMiddleware>,
    server_info: ServerInfo,
    privileged: HashSet<String>,
}

impl ProtocolHandler {
    pub fn new(
        registry: Arc<ToolRegistry>,
        auth: Arc<dyn AuthMiddleware>,
        server_info: ServerInfo,
    ) -> Self {
        Self {
            router: ToolRouter::new(registry.clone()),
            registry,
            auth,
            server_info,
            privileged: DEFAULT_PRIVILEGED_TOOLS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Replace the privileged tool set.
    pub fn with_privileged_tools<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.privileged = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_privileged(&self, name: &str) -> bool {
        self.privileged.contains(name)
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    /// Handle one decoded JSON message. `None` means no response frame.
    pub async fn handle_message(&self, message: Value, ctx: &RequestContext) -> Option<MCPResponse> {
        let id = message.get("id").cloned();
        match serde_json::from_value::<MCPRequest>(message) {
            Ok(request) => self.handle_request(request, ctx).await,
            Err(e) => {
                tracing::warn!(error = %e, "Invalid JSON-RPC request");
                Some(MCPResponse::error(
                    id,
                    codes::INVALID_REQUEST,
                    format!("Invalid request: {e}"),
                ))
            }
        }
    }

    /// Handle one request. A panic escaping the method handlers becomes an
    /// internal error.
    pub async fn handle_request(&self, request: MCPRequest, ctx: &RequestContext) -> Option<MCPResponse> {
        let id = request.id.clone();
        let method = request.method.clone();

        match AssertUnwindSafe(self.dispatch(request, ctx)).catch_unwind().await {
            Ok(response) => response,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(method = %method, panic = %message, "Request handler panicked");
                id.is_some()
                    .then(|| MCPResponse::error(id, codes::INTERNAL_ERROR, message))
            }
        }
    }

    async fn dispatch(&self, request: MCPRequest, ctx: &RequestContext) -> Option<MCPResponse> {
        if request.jsonrpc != "2.0" {
            tracing::warn!(version = %request.jsonrpc, "Unsupported jsonrpc version");
            return Some(MCPResponse::error(
                request.id,
                codes::INVALID_REQUEST,
                "Unsupported jsonrpc version (expected 2.0)",
            ));
        }

        let expects_response = request.id.is_some();
        let response = match request.method.as_str() {
            "initialize" => self.handle_initialize(request.id),
            "tools/list" => self.handle_tools_list(request.id),
            "tools/call" => self.handle_tools_call(&request, ctx).await,
            "ping" => MCPResponse::success(request.id, json!({})),
            method if method.starts_with("notifications/") => {
                tracing::debug!(method, "Received client notification");
                return None;
            }
            method => {
                tracing::debug!(method, "Unknown method");
                MCPResponse::error(
                    request.id,
                    codes::METHOD_NOT_FOUND,
                    format!("Unknown method: {method}"),
                )
            }
        };

        if !expects_response {
            tracing::debug!(method = %request.method, "Request without id, response dropped");
            return None;
        }
        Some(response)
    }

    fn handle_initialize(&self, id: Option<Value>) -> MCPResponse {
        MCPResponse::success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {
                    "tools": { "listChanged": true }
                },
                "serverInfo": {
                    "name": self.server_info.name,
                    "version": self.server_info.version
                }
            }),
        )
    }

    fn handle_tools_list(&self, id: Option<Value>) -> MCPResponse {
        let tools: Vec<Value> = self
            .registry
            .list_enabled()
            .iter()
            .map(|tool| tool.definition())
            .collect();
        MCPResponse::success(id, json!({ "tools": tools }))
    }

    async fn handle_tools_call(&self, request: &MCPRequest, ctx: &RequestContext) -> MCPResponse {
        let id = request.id.clone();
        let params = match request.params.clone() {
            Some(params) => params,
            None => {
                return MCPResponse::from_tool_error(
                    id,
                    &ToolError::InvalidParams("missing params".to_string()),
                );
            }
        };
        let ToolCallParams { name, arguments } = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(e) => {
                return MCPResponse::from_tool_error(id, &ToolError::InvalidParams(e.to_string()));
            }
        };
        let arguments = arguments.unwrap_or_else(|| json!({}));

        if self.is_privileged(&name) {
            let Some(payload) = self.auth.authenticate_request(request, ctx) else {
                tracing::warn!(tool = %name, "Unauthenticated call to privileged tool");
                return self.auth.create_error_response("Authentication required", id);
            };
            if !self.auth.authorize_tool_access(&payload, &name) {
                tracing::warn!(tool = %name, subject = %payload.sub, "Access denied to privileged tool");
                return self
                    .auth
                    .create_error_response(&format!("Access denied for tool '{name}'"), id);
            }
        }

        if !self.registry.is_enabled(&name) {
            let err = if self.registry.contains(&name) {
                ToolError::ToolDisabled(name)
            } else {
                ToolError::UnknownTool(name)
            };
            return MCPResponse::from_tool_error(id, &err);
        }

        match self.router.route(&name, arguments).await {
            Ok(result) => MCPResponse::success(id, result),
            Err(e) => MCPResponse::from_tool_error(id, &e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::auth::{AnonymousAuth, JwtAuth};
    use crate::core::config_store::JsonConfigStore;
    use crate::core::registry::{ToolHandler, ToolMetadata};

    fn registry() -> Arc<ToolRegistry> {
        let registry = Arc::new(ToolRegistry::new(Arc::new(JsonConfigStore::in_memory()), true));
        registry
            .register(
                ToolMetadata::new("search", "search")
                    .with_description("Search the project")
                    .with_handler(ToolHandler::sync(|args| Ok(json!({ "query": args["query"] })))),
            )
            .unwrap();
        registry
            .register(
                ToolMetadata::new("echo", "utility")
                    .with_description("Echo")
                    .with_handler(ToolHandler::asynchronous(|args| async move { Ok(args) })),
            )
            .unwrap();
        registry
            .register(
                ToolMetadata::new("broken", "utility")
                    .with_description("Always fails")
                    .with_handler(ToolHandler::sync(|_| Err("backend offline".to_string()))),
            )
            .unwrap();
        registry
            .register(
                ToolMetadata::new("enable_tool", "config")
                    .with_description("Enable a tool")
                    .with_handler(ToolHandler::sync(|_| Ok(json!({ "ok": true })))),
            )
            .unwrap();
        registry
            .register(
                ToolMetadata::new("exploding", "utility")
                    .with_description("Panics")
                    .with_handler(ToolHandler::sync(|_| panic!("kaboom"))),
            )
            .unwrap();
        registry
    }

    fn handler_with(auth: Arc<dyn AuthMiddleware>) -> ProtocolHandler {
        ProtocolHandler::new(
            registry(),
            auth,
            ServerInfo {
                name: "test-server".to_string(),
                version: "9.9.9".to_string(),
            },
        )
    }

    fn handler() -> ProtocolHandler {
        handler_with(Arc::new(AnonymousAuth))
    }

    async fn send(handler: &ProtocolHandler, message: Value) -> Option<Value> {
        handler
            .handle_message(message, &RequestContext::default())
            .await
            .map(|r| serde_json::to_value(r).unwrap())
    }

    fn call(id: i64, name: &str, arguments: Value) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": { "name": name, "arguments": arguments }
        })
    }

    #[tokio::test]
    async fn initialize_reports_identity_and_capabilities() {
        let response = send(
            &handler(),
            json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {} }),
        )
        .await
        .unwrap();

        assert_eq!(response["id"], json!(1));
        assert_eq!(response["result"]["protocolVersion"], json!("2024-11-05"));
        assert_eq!(
            response["result"]["capabilities"],
            json!({ "tools": { "listChanged": true } })
        );
        assert_eq!(
            response["result"]["serverInfo"],
            json!({ "name": "test-server", "version": "9.9.9" })
        );
        assert!(response.get("error").is_none());
    }

    #[tokio::test]
    async fn tools_list_hides_disabled_tools() {
        let handler = handler();
        handler.registry().disable("echo").unwrap();

        let response = send(&handler, json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" }))
            .await
            .unwrap();
        let names: Vec<&str> = response["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();

        assert_eq!(names, vec!["broken", "enable_tool", "exploding", "search"]);
        for name in names {
            assert!(handler.registry().is_enabled(name));
        }
        assert_eq!(
            response["result"]["tools"][3]["inputSchema"],
            json!({ "type": "object" })
        );
    }

    #[tokio::test]
    async fn tools_call_returns_raw_handler_result() {
        let response = send(&handler(), call(3, "search", json!({ "query": "fox" })))
            .await
            .unwrap();
        assert_eq!(response["result"], json!({ "query": "fox" }));
        assert_eq!(response["id"], json!(3));
    }

    #[tokio::test]
    async fn tools_call_awaits_async_handlers() {
        let response = send(&handler(), call(4, "echo", json!({ "a": [1, 2] })))
            .await
            .unwrap();
        assert_eq!(response["result"], json!({ "a": [1, 2] }));
    }

    #[tokio::test]
    async fn disabled_and_unknown_tools_are_method_not_found() {
        let handler = handler();
        handler.registry().disable("search").unwrap();

        let disabled = send(&handler, call(5, "search", json!({ "query": "fox" })))
            .await
            .unwrap();
        assert_eq!(disabled["error"]["code"], json!(-32601));
        assert_eq!(disabled["error"]["message"], json!("Tool 'search' is disabled"));

        let unknown = send(&handler, call(6, "nope", json!({}))).await.unwrap();
        assert_eq!(unknown["error"]["code"], json!(-32601));
        assert_eq!(unknown["id"], json!(6));
    }

    #[tokio::test]
    async fn handler_failures_are_internal_errors() {
        let response = send(&handler(), call(7, "broken", json!({}))).await.unwrap();
        assert_eq!(response["error"]["code"], json!(-32603));
        assert_eq!(
            response["error"]["message"],
            json!("Tool 'broken' failed: backend offline")
        );

        let response = send(&handler(), call(8, "exploding", json!({}))).await.unwrap();
        assert_eq!(response["error"]["code"], json!(-32603));
    }

    #[tokio::test]
    async fn missing_or_malformed_params_are_invalid_params() {
        let handler = handler();
        let missing = send(&handler, json!({ "jsonrpc": "2.0", "id": 9, "method": "tools/call" }))
            .await
            .unwrap();
        assert_eq!(missing["error"]["code"], json!(-32602));

        let nameless = send(
            &handler,
            json!({ "jsonrpc": "2.0", "id": 10, "method": "tools/call", "params": { "arguments": {} } }),
        )
        .await
        .unwrap();
        assert_eq!(nameless["error"]["code"], json!(-32602));
    }

    #[tokio::test]
    async fn notifications_produce_no_response() {
        let handler = handler();
        for method in ["notifications/initialized", "notifications/cancelled"] {
            assert!(
                send(&handler, json!({ "jsonrpc": "2.0", "method": method }))
                    .await
                    .is_none()
            );
        }
    }

    #[tokio::test]
    async fn requests_without_id_run_but_get_no_response() {
        let handler = handler();
        let response = send(
            &handler,
            json!({
                "jsonrpc": "2.0",
                "method": "tools/call",
                "params": { "name": "enable_tool", "arguments": {} }
            }),
        )
        .await;
        assert!(response.is_none());

        assert!(
            send(&handler, json!({ "jsonrpc": "2.0", "method": "resources/list" }))
                .await
                .is_none()
        );

        let explicit = send(&handler, json!({ "jsonrpc": "2.0", "id": 0, "method": "ping" }))
            .await
            .unwrap();
        assert_eq!(explicit["result"], json!({}));
    }

    struct CrashingAuth;

    impl AuthMiddleware for CrashingAuth {
        fn authenticate_request(
            &self,
            _request: &MCPRequest,
            _ctx: &RequestContext,
        ) -> Option<crate::core::auth::TokenPayload> {
            panic!("auth backend crashed")
        }

        fn authorize_tool_access(
            &self,
            _payload: &crate::core::auth::TokenPayload,
            _tool_name: &str,
        ) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn panics_outside_tool_handlers_are_internal_errors() {
        let handler = handler_with(Arc::new(CrashingAuth));

        let response = send(&handler, call(20, "enable_tool", json!({}))).await.unwrap();
        assert_eq!(response["id"], json!(20));
        assert_eq!(response["error"]["code"], json!(-32603));
        assert_eq!(response["error"]["message"], json!("auth backend crashed"));

        // The handler keeps serving after the panic.
        let response = send(&handler, call(21, "search", json!({ "query": "fox" })))
            .await
            .unwrap();
        assert_eq!(response["result"], json!({ "query": "fox" }));
    }

    #[tokio::test]
    async fn unknown_methods_and_bad_envelopes() {
        let handler = handler();
        let unknown = send(&handler, json!({ "jsonrpc": "2.0", "id": 11, "method": "resources/list" }))
            .await
            .unwrap();
        assert_eq!(unknown["error"]["code"], json!(-32601));

        let wrong_version = send(&handler, json!({ "jsonrpc": "1.0", "id": 12, "method": "ping" }))
            .await
            .unwrap();
        assert_eq!(wrong_version["error"]["code"], json!(-32600));

        let no_method = send(&handler, json!({ "jsonrpc": "2.0", "id": 13 })).await.unwrap();
        assert_eq!(no_method["error"]["code"], json!(-32600));
        assert_eq!(no_method["id"], json!(13));

        let ping = send(&handler, json!({ "jsonrpc": "2.0", "id": 14, "method": "ping" }))
            .await
            .unwrap();
        assert_eq!(ping["result"], json!({}));
    }

    #[tokio::test]
    async fn privileged_tools_require_auth_before_lookup() {
        let auth = Arc::new(JwtAuth::new("secret"));
        let handler = handler_with(auth.clone());

        // Rejected even though the tool is unknown: auth runs first.
        let handler = handler.with_privileged_tools(["enable_tool", "reload_config"]);
        let response = send(&handler, call(15, "reload_config", json!({}))).await.unwrap();
        assert_eq!(response["error"]["code"], json!(-32001));

        let response = send(&handler, call(16, "enable_tool", json!({}))).await.unwrap();
        assert_eq!(response["error"]["message"], json!("Authentication required"));

        let limited = auth.issue_token("viewer", vec!["search".into()], 60).unwrap();
        let ctx = RequestContext::from_authorization(Some(limited.as_str()));
        let response = handler
            .handle_message(call(17, "enable_tool", json!({})), &ctx)
            .await
            .unwrap();
        assert_eq!(
            response.error.unwrap().message,
            "Access denied for tool 'enable_tool'"
        );

        let admin = auth.issue_token("root", vec!["admin".into()], 60).unwrap();
        let ctx = RequestContext::from_authorization(Some(admin.as_str()));
        let response = handler
            .handle_message(call(18, "enable_tool", json!({})), &ctx)
            .await
            .unwrap();
        assert_eq!(response.result, Some(json!({ "ok": true })));

        // Unprivileged tools need no token.
        let response = send(&handler, call(19, "search", json!({ "query": "x" }))).await.unwrap();
        assert_eq!(response["result"], json!({ "query": "x" }));
    }
}
