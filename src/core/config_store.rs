/// Persisted Tool Configuration Store
///
/// The registry keeps its enabled-state projection in a store that outlives
/// the process. `ToolConfigStore` is the seam the registry talks to;
/// `JsonConfigStore` is the file-backed implementation used by the server.
///
/// File layout:
/// ```json
/// {
///   "version": "1.0.0",
///   "last_updated": "2026-01-01T00:00:00+00:00",
///   "tools": {
///     "echo": {
///       "name": "echo",
///       "category": "utility",
///       "enabled": true,
///       "description": "Echo a message back to the client.",
///       "dependencies": [],
///       "config": { "prefix": "Echo: " }
///     }
///   }
/// }
/// ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::error::{Result, ToolError};

pub const CONFIG_FORMAT_VERSION: &str = "1.0.0";

/// One persisted tool record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolConfigEntry {
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub config: Map<String, Value>,
}

fn default_enabled() -> bool {
    true
}

/// The on-disk document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfigFile {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub last_updated: String,
    #[serde(default)]
    pub tools: BTreeMap<String, ToolConfigEntry>,
}

fn default_version() -> String {
    CONFIG_FORMAT_VERSION.to_string()
}

impl Default for ToolConfigFile {
    fn default() -> Self {
        Self {
            version: default_version(),
            last_updated: chrono::Utc::now().to_rfc3339(),
            tools: BTreeMap::new(),
        }
    }
}

/// Aggregate counts over the persisted records.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolConfigStats {
    pub total_tools: usize,
    pub enabled_tools: usize,
    pub disabled_tools: usize,
    pub categories: BTreeMap<String, usize>,
    pub last_updated: String,
}

/// Persisted enable/disable configuration consumed by the registry.
///
/// Mutators return `Ok(false)` when the name has no persisted record and
/// `Err` only when the change could not be written out.
pub trait ToolConfigStore: Send + Sync {
    fn get_tool_config(&self, name: &str) -> Option<ToolConfigEntry>;

    fn has_entry(&self, name: &str) -> bool {
        self.get_tool_config(name).is_some()
    }

    /// Persisted flag; `false` when there is no record.
    fn is_enabled(&self, name: &str) -> bool {
        self.get_tool_config(name).map(|e| e.enabled).unwrap_or(false)
    }

    fn enable(&self, name: &str) -> Result<bool>;
    fn disable(&self, name: &str) -> Result<bool>;

    /// Flip the persisted flag. Returns `false` when there is no record.
    fn toggle(&self, name: &str) -> Result<bool>;

    /// Insert or replace a record.
    fn upsert(&self, entry: ToolConfigEntry) -> Result<()>;

    /// Merge keys into a record's config bag.
    fn update_config(&self, name: &str, config: Map<String, Value>) -> Result<bool>;

    fn all(&self) -> BTreeMap<String, ToolConfigEntry>;
    fn stats(&self) -> ToolConfigStats;

    /// Re-read the backing storage, replacing in-memory state.
    fn reload(&self) -> Result<()>;
    fn save(&self) -> Result<()>;
}

/// JSON-file backed store.
pub struct JsonConfigStore {
    path: Option<PathBuf>,
    data: RwLock<ToolConfigFile>,
}

impl JsonConfigStore {
    /// Open the store at `path`, creating the file when it does not exist.
    ///
    /// A file that exists but cannot be parsed is logged and replaced by an
    /// empty in-memory document; it is not overwritten until the next change.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let store = Self {
            path: Some(path.clone()),
            data: RwLock::new(ToolConfigFile::default()),
        };

        if path.exists() {
            match read_config_file(&path) {
                Ok(file) => {
                    tracing::info!(
                        path = %path.display(),
                        tools = file.tools.len(),
                        "Loaded tool configuration"
                    );
                    *store.data.write() = file;
                }
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "Failed to load tool configuration");
                }
            }
        } else {
            store.save()?;
            tracing::info!(path = %path.display(), "Created default tool configuration");
        }

        Ok(store)
    }

    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: RwLock::new(ToolConfigFile::default()),
        }
    }

    /// Apply `f` to the named record and persist when it reports a change.
    fn mutate_entry<F>(&self, name: &str, f: F) -> Result<bool>
    where
        F: FnOnce(&mut ToolConfigEntry),
    {
        {
            let mut data = self.data.write();
            let Some(entry) = data.tools.get_mut(name) else {
                return Ok(false);
            };
            f(entry);
            data.last_updated = chrono::Utc::now().to_rfc3339();
        }
        self.save()?;
        Ok(true)
    }
}

fn read_config_file(path: &Path) -> Result<ToolConfigFile> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

impl ToolConfigStore for JsonConfigStore {
    fn get_tool_config(&self, name: &str) -> Option<ToolConfigEntry> {
        self.data.read().tools.get(name).cloned()
    }

    fn has_entry(&self, name: &str) -> bool {
        self.data.read().tools.contains_key(name)
    }

    fn enable(&self, name: &str) -> Result<bool> {
        let changed = self.mutate_entry(name, |e| e.enabled = true)?;
        if changed {
            tracing::info!(tool = name, "Enabled tool in persisted configuration");
        }
        Ok(changed)
    }

    fn disable(&self, name: &str) -> Result<bool> {
        let changed = self.mutate_entry(name, |e| e.enabled = false)?;
        if changed {
            tracing::info!(tool = name, "Disabled tool in persisted configuration");
        }
        Ok(changed)
    }

    fn toggle(&self, name: &str) -> Result<bool> {
        let changed = self.mutate_entry(name, |e| e.enabled = !e.enabled)?;
        if changed {
            tracing::info!(
                tool = name,
                enabled = self.is_enabled(name),
                "Toggled tool in persisted configuration"
            );
        }
        Ok(changed)
    }

    fn upsert(&self, entry: ToolConfigEntry) -> Result<()> {
        {
            let mut data = self.data.write();
            data.tools.insert(entry.name.clone(), entry);
            data.last_updated = chrono::Utc::now().to_rfc3339();
        }
        self.save()
    }

    fn update_config(&self, name: &str, config: Map<String, Value>) -> Result<bool> {
        self.mutate_entry(name, |e| e.config.extend(config))
    }

    fn all(&self) -> BTreeMap<String, ToolConfigEntry> {
        self.data.read().tools.clone()
    }

    fn stats(&self) -> ToolConfigStats {
        let data = self.data.read();
        let enabled_tools = data.tools.values().filter(|e| e.enabled).count();
        let mut categories = BTreeMap::new();
        for entry in data.tools.values() {
            let category = if entry.category.is_empty() {
                "unknown".to_string()
            } else {
                entry.category.clone()
            };
            *categories.entry(category).or_insert(0) += 1;
        }

        ToolConfigStats {
            total_tools: data.tools.len(),
            enabled_tools,
            disabled_tools: data.tools.len() - enabled_tools,
            categories,
            last_updated: data.last_updated.clone(),
        }
    }

    fn reload(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !path.exists() {
            return Err(ToolError::Config(format!(
                "tool configuration {} no longer exists",
                path.display()
            )));
        }
        let file = read_config_file(path)?;
        tracing::info!(path = %path.display(), tools = file.tools.len(), "Reloaded tool configuration");
        *self.data.write() = file;
        Ok(())
    }

    fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(&*self.data.read())?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, json)?;
        tracing::debug!(path = %path.display(), "Saved tool configuration");
        Ok(())
    }
}
