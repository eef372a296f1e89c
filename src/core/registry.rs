/// Tool Registry
///
/// The in-memory catalog of every tool the server knows about. Each entry
/// holds the tool's metadata and a shared reference to its handler. The
/// enabled state is projected into a `ToolConfigStore` so that operators can
/// switch tools off across restarts.
///
/// The effective enabled state of a tool is computed in one place,
/// `effective_enabled`:
///
/// ```text
/// enabled = local && persisted.unwrap_or(local)
/// ```
///
/// A tool without a persisted record is governed by its registration flag
/// alone; a persisted record can only narrow that flag, never widen it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::core::config_store::{ToolConfigEntry, ToolConfigStore};
use crate::core::error::{Result, ToolError};

/// Outcome of a single tool invocation. Handlers report failures as strings;
/// the router wraps them into `ToolError::ToolExecutionFailed`.
pub type ToolResult = std::result::Result<Value, String>;

/// Handler invoked inline on the calling task.
pub type SyncHandler = Arc<dyn Fn(Value) -> ToolResult + Send + Sync>;

/// Handler whose result must be awaited.
pub type AsyncHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, ToolResult> + Send + Sync>;

/// How the router invokes a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Sync,
    Async,
}

/// The uniform handler contract: every tool takes its `arguments` object as
/// one JSON value and returns a JSON value or an error message.
#[derive(Clone)]
pub enum ToolHandler {
    Sync(SyncHandler),
    Async(AsyncHandler),
}

impl ToolHandler {
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(Value) -> ToolResult + Send + Sync + 'static,
    {
        ToolHandler::Sync(Arc::new(f))
    }

    pub fn asynchronous<F, Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult> + Send + 'static,
    {
        ToolHandler::Async(Arc::new(move |args| -> BoxFuture<'static, ToolResult> {
            Box::pin(f(args))
        }))
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        match self {
            ToolHandler::Sync(_) => ExecutionMode::Sync,
            ToolHandler::Async(_) => ExecutionMode::Async,
        }
    }
}

impl std::fmt::Debug for ToolHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ToolHandler::{:?}", self.execution_mode())
    }
}

/// Where a tool was declared. Diagnostics only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
}

/// Registration descriptor and catalog entry for one tool.
///
/// Tool modules build these with the `with_*` methods and hand them to the
/// registry. The execution mode follows the handler it is given.
#[derive(Debug, Clone)]
pub struct ToolMetadata {
    pub name: String,
    pub category: String,
    pub description: String,
    pub execution_mode: ExecutionMode,
    pub enabled: bool,
    pub dependencies: Vec<String>,
    pub config: Map<String, Value>,
    pub input_schema: Value,
    pub handler: Option<ToolHandler>,
    pub source_location: Option<SourceLocation>,
}

impl ToolMetadata {
    pub fn new(name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            description: String::new(),
            execution_mode: ExecutionMode::Sync,
            enabled: true,
            dependencies: Vec::new(),
            config: Map::new(),
            input_schema: json!({ "type": "object" }),
            handler: None,
            source_location: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_handler(mut self, handler: ToolHandler) -> Self {
        self.execution_mode = handler.execution_mode();
        self.handler = Some(handler);
        self
    }

    #[cfg(test)]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[cfg(test)]
    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_config(mut self, config: Value) -> Self {
        if let Value::Object(map) = config {
            self.config = map;
        }
        self
    }

    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn at(mut self, file: &str, line: u32) -> Self {
        self.source_location = Some(SourceLocation {
            file: file.to_string(),
            line,
        });
        self
    }

    /// MCP tool definition as served by tools/list.
    pub fn definition(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema,
        })
    }

    fn config_entry(&self) -> ToolConfigEntry {
        ToolConfigEntry {
            name: self.name.clone(),
            category: self.category.clone(),
            enabled: self.enabled,
            description: self.description.clone(),
            dependencies: self.dependencies.clone(),
            config: self.config.clone(),
        }
    }
}

/// Point-in-time view of how a tool's enabled state is derived.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolStatus {
    pub name: String,
    pub category: String,
    pub local_enabled: bool,
    pub persisted_enabled: Option<bool>,
    pub enabled: bool,
    pub execution_mode: ExecutionMode,
    pub dependencies: Vec<String>,
}

/// Single source of the enabled-state precedence rule.
pub fn effective_enabled(local: bool, persisted: Option<bool>) -> bool {
    local && persisted.unwrap_or(local)
}

#[derive(Default)]
struct RegistryState {
    by_name: HashMap<String, ToolMetadata>,
    by_category: BTreeMap<String, BTreeSet<String>>,
}

impl RegistryState {
    fn unindex(&mut self, name: &str, category: &str) {
        if let Some(names) = self.by_category.get_mut(category) {
            names.remove(name);
            if names.is_empty() {
                self.by_category.remove(category);
            }
        }
    }
}

/// Registry of available tools.
///
/// All maps live behind one reader-writer lock, so registration during live
/// traffic never tears an iteration over the catalog. The registry lock is
/// released before the store is called.
pub struct ToolRegistry {
    state: RwLock<RegistryState>,
    store: Arc<dyn ToolConfigStore>,
    auto_sync: bool,
}

impl ToolRegistry {
    /// Create an empty registry backed by `store`.
    ///
    /// # Arguments
    /// * `store` - Persisted configuration the enabled state is projected into
    /// * `auto_sync` - Push every registration into the store
    pub fn new(store: Arc<dyn ToolConfigStore>, auto_sync: bool) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            store,
            auto_sync,
        }
    }

    pub fn store(&self) -> &Arc<dyn ToolConfigStore> {
        &self.store
    }

    /// Register a tool, replacing any previous entry with the same name.
    ///
    /// Re-registration is not an error: the last registration wins. With
    /// auto-sync on, a new tool gets a persisted record carrying its declared
    /// flag; an existing record keeps its flag and config values and has its
    /// descriptive fields refreshed.
    pub fn register(&self, metadata: ToolMetadata) -> Result<()> {
        let name = metadata.name.clone();
        let category = metadata.category.clone();
        let entry = metadata.config_entry();

        {
            let mut state = self.state.write();
            if let Some(previous) = state.by_name.insert(name.clone(), metadata) {
                tracing::debug!(tool = %name, "Replacing existing tool registration");
                if previous.category != category {
                    state.unindex(&name, &previous.category);
                }
            }
            state
                .by_category
                .entry(category.clone())
                .or_default()
                .insert(name.clone());
        }

        tracing::debug!(tool = %name, category = %category, "Registered tool");

        if self.auto_sync {
            self.sync_entry(entry)?;
        }
        Ok(())
    }

    fn sync_entry(&self, entry: ToolConfigEntry) -> Result<()> {
        let merged = match self.store.get_tool_config(&entry.name) {
            Some(existing) => {
                let mut config = existing.config.clone();
                for (key, value) in entry.config {
                    config.entry(key).or_insert(value);
                }
                let merged = ToolConfigEntry {
                    enabled: existing.enabled,
                    config,
                    ..entry
                };
                if merged == existing {
                    return Ok(());
                }
                merged
            }
            None => entry,
        };
        self.store.upsert(merged)
    }

    /// Effective enabled state; `false` for unknown names.
    pub fn is_enabled(&self, name: &str) -> bool {
        let local = match self.state.read().by_name.get(name) {
            Some(metadata) => metadata.enabled,
            None => return false,
        };
        effective_enabled(local, self.persisted_flag(name))
    }

    fn persisted_flag(&self, name: &str) -> Option<bool> {
        self.store
            .has_entry(name)
            .then(|| self.store.is_enabled(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state.read().by_name.contains_key(name)
    }

    /// Resolve a callable handler.
    ///
    /// Fails with `UnknownTool` for unregistered names, `ToolDisabled` when the
    /// effective state is off and `MissingHandler` for metadata-only entries.
    pub fn get_handler(&self, name: &str) -> Result<(ToolHandler, ExecutionMode)> {
        let (handler, mode) = {
            let state = self.state.read();
            let metadata = state
                .by_name
                .get(name)
                .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
            (metadata.handler.clone(), metadata.execution_mode)
        };

        if !self.is_enabled(name) {
            return Err(ToolError::ToolDisabled(name.to_string()));
        }

        handler
            .map(|h| (h, mode))
            .ok_or_else(|| ToolError::MissingHandler(name.to_string()))
    }

    /// Enable a tool locally and in the store. `Ok(false)` for unknown names.
    pub fn enable(&self, name: &str) -> Result<bool> {
        self.set_enabled(name, true)
    }

    /// Disable a tool locally and in the store. `Ok(false)` for unknown names.
    pub fn disable(&self, name: &str) -> Result<bool> {
        self.set_enabled(name, false)
    }

    /// Flip a tool's effective state.
    ///
    /// The current state is read through the persisted record. When that
    /// record already agrees with the effective state it is flipped in place;
    /// otherwise both sides are written with the new state.
    pub fn toggle(&self, name: &str) -> Result<bool> {
        let local = match self.state.read().by_name.get(name) {
            Some(metadata) => metadata.enabled,
            None => return Ok(false),
        };
        let persisted = self.persisted_flag(name);
        let current = effective_enabled(local, persisted);
        if persisted != Some(current) {
            return self.set_enabled(name, !current);
        }

        if let Some(metadata) = self.state.write().by_name.get_mut(name) {
            metadata.enabled = !current;
        }
        self.store.toggle(name)?;
        tracing::info!(tool = name, enabled = !current, "Toggled tool");
        Ok(true)
    }

    fn set_enabled(&self, name: &str, enabled: bool) -> Result<bool> {
        let entry = {
            let mut state = self.state.write();
            let Some(metadata) = state.by_name.get_mut(name) else {
                return Ok(false);
            };
            metadata.enabled = enabled;
            metadata.config_entry()
        };

        let persisted = if enabled {
            self.store.enable(name)?
        } else {
            self.store.disable(name)?
        };
        if !persisted {
            self.store.upsert(entry)?;
        }

        tracing::info!(tool = name, enabled, "Updated tool state");
        Ok(true)
    }

    /// Merge `config` into a tool's config bag and its persisted record.
    pub fn update_tool_config(&self, name: &str, config: Map<String, Value>) -> Result<bool> {
        let entry = {
            let mut state = self.state.write();
            let Some(metadata) = state.by_name.get_mut(name) else {
                return Ok(false);
            };
            metadata.config.extend(config.clone());
            metadata.config_entry()
        };

        if !self.store.update_config(name, config)? {
            self.store.upsert(entry)?;
        }
        tracing::info!(tool = name, "Updated tool configuration");
        Ok(true)
    }

    /// Re-read the store and copy persisted flags onto the in-memory entries.
    ///
    /// Tools without a persisted record keep their current flag. Returns the
    /// number of tools whose flag came from the store.
    pub fn reload_config(&self) -> Result<usize> {
        self.store.reload()?;
        let persisted = self.store.all();

        let mut updated = 0;
        let mut state = self.state.write();
        for (name, metadata) in state.by_name.iter_mut() {
            if let Some(entry) = persisted.get(name) {
                metadata.enabled = entry.enabled;
                updated += 1;
            }
        }
        tracing::info!(updated, total = state.by_name.len(), "Reloaded tool configuration");
        Ok(updated)
    }

    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<ToolMetadata> {
        self.state.read().by_name.get(name).cloned()
    }

    /// Declared config values overlaid with the persisted ones.
    pub fn tool_config(&self, name: &str) -> Option<Map<String, Value>> {
        let mut config = self.state.read().by_name.get(name)?.config.clone();
        if let Some(entry) = self.store.get_tool_config(name) {
            config.extend(entry.config);
        }
        Some(config)
    }

    pub fn status(&self, name: &str) -> Option<ToolStatus> {
        let (category, local, mode, dependencies) = {
            let state = self.state.read();
            let metadata = state.by_name.get(name)?;
            (
                metadata.category.clone(),
                metadata.enabled,
                metadata.execution_mode,
                metadata.dependencies.clone(),
            )
        };
        let persisted = self.persisted_flag(name);
        Some(ToolStatus {
            name: name.to_string(),
            category,
            local_enabled: local,
            persisted_enabled: persisted,
            enabled: effective_enabled(local, persisted),
            execution_mode: mode,
            dependencies,
        })
    }

    /// Snapshot of every registered tool, sorted by name.
    pub fn list_all(&self) -> Vec<ToolMetadata> {
        let mut tools: Vec<ToolMetadata> = self.state.read().by_name.values().cloned().collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Snapshot of the tools in `category`, sorted by name.
    pub fn list_by_category(&self, category: &str) -> Vec<ToolMetadata> {
        let state = self.state.read();
        state
            .by_category
            .get(category)
            .map(|names| {
                names
                    .iter()
                    .filter_map(|name| state.by_name.get(name).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Snapshot of the effectively enabled tools, sorted by name.
    pub fn list_enabled(&self) -> Vec<ToolMetadata> {
        self.list_all()
            .into_iter()
            .filter(|metadata| {
                effective_enabled(metadata.enabled, self.persisted_flag(&metadata.name))
            })
            .collect()
    }

    pub fn categories(&self) -> Vec<String> {
        self.state.read().by_category.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().by_name.is_empty()
    }
}
