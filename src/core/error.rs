/// Error Types for the Tool Server
///
/// One error enum covers the registry, router, discovery and configuration
/// layers. The protocol layer maps each variant onto a JSON-RPC error code
/// through `ToolError::rpc_code`.

use thiserror::Error;

/// Result type alias for tool server operations
pub type Result<T> = std::result::Result<T, ToolError>;

/// JSON-RPC 2.0 error codes used by the server.
pub mod codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    pub const UNAUTHORIZED: i32 = -32001;
}

/// Errors raised while registering, resolving or executing tools.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The name was never registered
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Registered but effectively disabled
    #[error("Tool '{0}' is disabled")]
    ToolDisabled(String),

    /// Registered without a handler reference
    #[error("Tool '{0}' has no handler")]
    MissingHandler(String),

    /// The handler returned an error or panicked
    #[error("Tool '{name}' failed: {detail}")]
    ToolExecutionFailed { name: String, detail: String },

    /// Malformed tools/call parameters
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// A single source file or module could not be scanned or loaded
    #[error("Discovery failed for {path}: {detail}")]
    Discovery { path: String, detail: String },

    /// Invalid process or tool configuration
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ToolError {
    /// JSON-RPC error code reported to protocol callers.
    ///
    /// Unknown and disabled tools share "method not found"; a handler that
    /// ran and failed is an internal error.
    pub fn rpc_code(&self) -> i32 {
        match self {
            ToolError::UnknownTool(_) | ToolError::ToolDisabled(_) => codes::METHOD_NOT_FOUND,
            ToolError::InvalidParams(_) => codes::INVALID_PARAMS,
            _ => codes::INTERNAL_ERROR,
        }
    }

    pub fn execution_failed(name: &str, detail: impl Into<String>) -> Self {
        ToolError::ToolExecutionFailed {
            name: name.to_string(),
            detail: detail.into(),
        }
    }
}
