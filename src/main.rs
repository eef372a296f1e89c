/// MCP Tool Server Entry Point
///
/// Reads configuration from the environment (see `core::config`), opens the
/// persisted tool configuration, loads the tool modules into the registry
/// and starts the selected transports.
///
/// Usage:
/// - `mcp-tool-server`: run the server
/// - `mcp-tool-server issue-token <subject> [--permissions a,b] [--ttl secs]`:
///   print a JWT for calling privileged tools, signed with MCP_JWT_SECRET.
///   Permissions default to `admin`, the lifetime to 24 hours.

mod core;
mod tools;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::core::auth::{ADMIN_PERMISSION, AnonymousAuth, AuthMiddleware, JwtAuth};
use crate::core::config::{ServerConfig, TransportMode};
use crate::core::config_store::JsonConfigStore;
use crate::core::discovery::ToolDiscovery;
use crate::core::error::ToolError;
use crate::core::protocol::{ProtocolHandler, ServerInfo};
use crate::core::registry::ToolRegistry;
use crate::core::server;

const DEFAULT_TOKEN_TTL_SECS: i64 = 24 * 60 * 60;

/// MCP server exposing a persisted, runtime-configurable tool registry
#[derive(Parser, Debug)]
#[command(name = "mcp-tool-server")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a JWT for calling privileged tools, signed with MCP_JWT_SECRET
    IssueToken {
        /// Token subject
        subject: String,

        /// Comma-separated permissions
        #[arg(short, long, value_delimiter = ',', default_value = ADMIN_PERMISSION)]
        permissions: Vec<String>,

        /// Token lifetime in seconds
        #[arg(long, default_value_t = DEFAULT_TOKEN_TTL_SECS)]
        ttl: i64,
    },
}

fn into_io(err: ToolError) -> std::io::Error {
    match err {
        ToolError::Io(e) => e,
        other => std::io::Error::other(other.to_string()),
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    // stdout is reserved for JSON-RPC frames
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("mcp_tool_server=info,actix_web=info")),
        )
        .init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };

    if let Some(Command::IssueToken {
        subject,
        permissions,
        ttl,
    }) = cli.command
    {
        return issue_token(&config, &subject, permissions, ttl);
    }

    let handler = build_handler(&config)?;

    match config.transport {
        TransportMode::Stdio => server::run_server_stdio(handler).await,
        TransportMode::Http => {
            server::run_server_http(handler, config.bind_addr(), config.workers).await
        }
        TransportMode::Both => {
            let stdio_handler = handler.clone();
            let stdio_task = tokio::spawn(async move {
                if let Err(e) = server::run_server_stdio(stdio_handler).await {
                    tracing::error!(error = %e, "STDIO server error");
                }
            });

            let http_result =
                server::run_server_http(handler, config.bind_addr(), config.workers).await;

            stdio_task.abort();
            http_result
        }
    }
}

/// Open the store, load the tools and wire up the protocol handler.
fn build_handler(config: &ServerConfig) -> std::io::Result<Arc<ProtocolHandler>> {
    let store = JsonConfigStore::open(&config.tool_config_path).map_err(into_io)?;
    tracing::info!(path = %config.tool_config_path.display(), "Opened tool configuration");

    let registry = Arc::new(ToolRegistry::new(Arc::new(store), config.auto_sync));
    let discovery = ToolDiscovery::new(registry.clone(), tools::manifest());

    match &config.tools_source_dir {
        Some(root) => {
            let scan = discovery.scan(root).map_err(into_io)?;
            tracing::info!(
                markers = scan.total,
                files = scan.scanned_files,
                "Scanned tool sources"
            );
            discovery.discover_and_import(root).map_err(into_io)?;
        }
        None => {
            discovery.load_manifest();
        }
    }

    if registry.is_empty() {
        tracing::warn!("No tools registered");
    }

    let report = discovery.validate();
    tracing::info!(
        total = report.total_tools,
        enabled = report.enabled_tools,
        disabled = report.disabled_tools,
        "Tool registry ready"
    );
    for issue in &report.issues {
        tracing::warn!(issue = %issue, "Tool validation issue");
    }

    let auth: Arc<dyn AuthMiddleware> = match &config.jwt_secret {
        Some(secret) => Arc::new(JwtAuth::new(secret)),
        None => {
            tracing::warn!("MCP_JWT_SECRET not set, privileged tools accept every caller");
            Arc::new(AnonymousAuth)
        }
    };

    let handler = ProtocolHandler::new(
        registry,
        auth,
        ServerInfo {
            name: config.name.clone(),
            version: config.version.clone(),
        },
    )
    .with_privileged_tools(config.privileged_tools.iter().cloned());

    Ok(Arc::new(handler))
}

fn issue_token(
    config: &ServerConfig,
    subject: &str,
    permissions: Vec<String>,
    ttl: i64,
) -> std::io::Result<()> {
    let Some(secret) = &config.jwt_secret else {
        return Err(std::io::Error::other("MCP_JWT_SECRET must be set to issue tokens"));
    };
    let permissions: Vec<String> = permissions
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();

    let token = JwtAuth::new(secret)
        .issue_token(subject, permissions, ttl)
        .map_err(into_io)?;
    println!("{token}");
    Ok(())
}
