/// Core Server Framework Module
///
/// This module contains the framework the tools plug into:
/// - error.rs: error type and JSON-RPC error codes
/// - config.rs: environment configuration
/// - config_store.rs: persisted per-tool configuration
/// - registry.rs: tool catalog and enabled-state rules
/// - discovery.rs: registration marker scan and manifest loading
/// - router.rs: tool invocation
/// - auth.rs: authentication for privileged tools
/// - protocol.rs: MCP method dispatch
/// - server.rs: STDIO and HTTP transports

pub mod auth;
pub mod config;
pub mod config_store;
pub mod discovery;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod server;
