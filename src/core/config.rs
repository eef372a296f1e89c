/// Server Configuration
///
/// Process configuration is read from environment variables once at startup.
/// A `.env` file in the working directory is loaded first when present.
///
/// Environment Variables:
/// - SERVER_NAME: Name reported in `initialize` (default: "mcp-tool-server")
/// - SERVER_VERSION: Version reported in `initialize` (default: crate version)
/// - MCP_TRANSPORT_MODE: "stdio", "http", or "both" (default: "stdio")
/// - HOST / PORT: HTTP bind address (default: "0.0.0.0" / 3000)
/// - WORKER_THREADS: actix worker count (default: CPU count, capped at 16)
/// - TOOL_CONFIG_PATH: persisted tool configuration file (default: "tool_config.json")
/// - TOOL_CONFIG_AUTO_SYNC: push registrations into the store (default: true)
/// - TOOLS_SOURCE_DIR: source tree to run discovery against (default: unset)
/// - MCP_JWT_SECRET: enables JWT auth for privileged tools (default: unset)
/// - MCP_PRIVILEGED_TOOLS: comma-separated privileged tool list (default: built-in)

use std::path::PathBuf;
use std::str::FromStr;

use crate::core::error::{Result, ToolError};
use crate::core::protocol::DEFAULT_PRIVILEGED_TOOLS;

/// Which transports the server runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Stdio,
    Http,
    Both,
}

impl FromStr for TransportMode {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stdio" => Ok(Self::Stdio),
            "http" => Ok(Self::Http),
            "both" => Ok(Self::Both),
            other => Err(ToolError::Config(format!(
                "invalid transport mode '{other}', must be 'stdio', 'http', or 'both'"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub name: String,
    pub version: String,
    pub transport: TransportMode,
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub tool_config_path: PathBuf,
    pub auto_sync: bool,
    pub tools_source_dir: Option<PathBuf>,
    pub jwt_secret: Option<String>,
    pub privileged_tools: Vec<String>,
}

impl ServerConfig {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    ///
    /// Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let transport = match get("MCP_TRANSPORT_MODE") {
            Some(value) => value.parse()?,
            None => TransportMode::Stdio,
        };

        let port = match get("PORT") {
            Some(value) => value
                .trim()
                .parse::<u16>()
                .map_err(|e| ToolError::Config(format!("invalid PORT '{value}': {e}")))?,
            None => 3000,
        };

        let workers = match get("WORKER_THREADS") {
            Some(value) => match value.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ToolError::Config(format!(
                        "invalid WORKER_THREADS '{value}', expected a positive integer"
                    )));
                }
            },
            None => num_cpus::get().clamp(1, 16),
        };

        let auto_sync = match get("TOOL_CONFIG_AUTO_SYNC") {
            Some(value) => parse_bool(&value).ok_or_else(|| {
                ToolError::Config(format!("invalid TOOL_CONFIG_AUTO_SYNC '{value}'"))
            })?,
            None => true,
        };

        let privileged_tools = match get("MCP_PRIVILEGED_TOOLS") {
            Some(value) => value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            None => DEFAULT_PRIVILEGED_TOOLS.iter().map(|s| s.to_string()).collect(),
        };

        Ok(Self {
            name: get("SERVER_NAME").unwrap_or_else(|| "mcp-tool-server".to_string()),
            version: get("SERVER_VERSION").unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
            transport,
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            workers,
            tool_config_path: get("TOOL_CONFIG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("tool_config.json")),
            auto_sync,
            tools_source_dir: get("TOOLS_SOURCE_DIR").map(PathBuf::from),
            jwt_secret: get("MCP_JWT_SECRET"),
            privileged_tools,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
