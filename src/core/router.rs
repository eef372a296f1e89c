/// Tool Router
///
/// Resolves a tool by name through the registry and invokes its handler with
/// the call's `arguments`. Sync handlers run inline on the calling task, async
/// handlers are awaited. Errors and panics raised by a handler come back as
/// `ToolError::ToolExecutionFailed`.
///
/// The router imposes no deadline: a caller that needs one wraps `route` in
/// `tokio::time::timeout` or similar.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::Value;

use crate::core::error::{Result, ToolError};
use crate::core::registry::{ToolHandler, ToolRegistry};

#[derive(Clone)]
pub struct ToolRouter {
    registry: Arc<ToolRegistry>,
}

impl ToolRouter {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// Execute the named tool.
    ///
    /// # Arguments
    /// * `name` - Registered tool name
    /// * `arguments` - Passed to the handler unmodified
    ///
    /// # Errors
    /// `UnknownTool`, `ToolDisabled` and `MissingHandler` from the registry;
    /// `ToolExecutionFailed` when the handler errors or panics.
    pub async fn route(&self, name: &str, arguments: Value) -> Result<Value> {
        let (handler, mode) = self.registry.get_handler(name)?;
        tracing::debug!(tool = name, ?mode, "Dispatching tool call");

        let outcome = match handler {
            ToolHandler::Sync(f) => catch_unwind(AssertUnwindSafe(|| f(arguments))),
            ToolHandler::Async(f) => AssertUnwindSafe(async move { f(arguments).await })
                .catch_unwind()
                .await,
        };

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(detail)) => {
                tracing::warn!(tool = name, error = %detail, "Tool returned an error");
                Err(ToolError::execution_failed(name, detail))
            }
            Err(panic) => {
                let detail = panic_message(panic.as_ref());
                tracing::error!(tool = name, panic = %detail, "Tool handler panicked");
                Err(ToolError::execution_failed(name, detail))
            }
        }
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
