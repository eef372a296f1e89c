/// Tool Discovery
///
/// Populates the registry from the tool modules compiled into the server.
/// Every tool module exposes one registration function; the list of those
/// functions is the manifest (`tools::manifest()`), keyed by module path.
///
/// Discovery runs in two passes:
/// - A static scan that reads source files and counts registration markers
///   without executing anything. Its report is diagnostic only.
/// - A load pass that maps each source file to its module path, runs that
///   module's registration function and registers what it returns.
///
/// A registration marker is a directive comment directly above a top-level
/// function, either bare or with arguments:
///
/// ```text
/// // @tool
/// pub fn handler(args: Value) -> ToolResult { ... }
///
/// // @tool(name = "echo", category = "utility")
/// fn echo(args: Value) -> ToolResult { ... }
/// ```
///
/// Doc comments and attributes may sit between the marker and the `fn`.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Serialize;

use crate::core::error::{Result, ToolError};
use crate::core::registry::{ToolMetadata, ToolRegistry};
use crate::core::router::panic_message;

static MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^//\s*@tool\s*(\(.*\))?\s*$").unwrap());

static FN_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^(pub(\([^)]*\))?\s+)?(const\s+)?(async\s+)?(unsafe\s+)?(extern\s+("[^"]*"\s+)?)?fn\s+[A-Za-z_][A-Za-z0-9_]*"#,
    )
    .unwrap()
});

/// Directory names never descended into.
const EXCLUDED_DIRS: &[&str] = &["target", "tests", "node_modules"];

/// Registration function exported by a tool module.
pub type RegisterFn = fn(&Arc<ToolRegistry>) -> Result<Vec<ToolMetadata>>;

/// One manifest entry.
#[derive(Clone, Copy)]
pub struct ToolModule {
    /// Crate-relative module path, e.g. `tools::echo`
    pub path: &'static str,
    pub register: RegisterFn,
}

/// Result of the static scan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiscoveryReport {
    /// Marker count per file, for files with at least one marker
    pub files: BTreeMap<String, usize>,
    pub total: usize,
    pub scanned_files: usize,
    /// Files that could not be read
    pub errors: Vec<String>,
}

/// Registry health after discovery.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub total_tools: usize,
    pub enabled_tools: usize,
    pub disabled_tools: usize,
    pub categories: BTreeMap<String, usize>,
    pub issues: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

pub struct ToolDiscovery {
    registry: Arc<ToolRegistry>,
    modules: Vec<ToolModule>,
}

impl ToolDiscovery {
    pub fn new(registry: Arc<ToolRegistry>, modules: Vec<ToolModule>) -> Self {
        Self { registry, modules }
    }

    /// Count registration markers under `root` without loading anything.
    pub fn scan(&self, root: &Path) -> Result<DiscoveryReport> {
        scan_registrations(root)
    }

    /// Walk `root`, load the manifest entry for every source file found and
    /// register the tools it declares.
    ///
    /// Files without a manifest entry are skipped, and each entry runs at
    /// most once even when several files map onto it. A module whose
    /// registration fails or panics is logged and skipped; the walk
    /// continues. Returns the number of tools registered.
    pub fn discover_and_import(&self, root: &Path) -> Result<usize> {
        let files = collect_source_files(root)?;
        tracing::info!(root = %root.display(), files = files.len(), "Discovering tool modules");

        let mut loaded: HashSet<&'static str> = HashSet::new();
        let mut discovered = 0;
        for file in files {
            let Some(module_path) = module_path_for(root, &file) else {
                continue;
            };
            let Some(module) = self.find_module(&module_path) else {
                tracing::debug!(module = %module_path, "No registration entry for module, skipping");
                continue;
            };
            if !loaded.insert(module.path) {
                tracing::debug!(
                    module = %module_path,
                    entry = module.path,
                    "Registration entry already loaded, skipping"
                );
                continue;
            }

            match self.load_module(module) {
                Ok(count) => {
                    if let Ok(source) = fs::read_to_string(&file) {
                        let markers = count_markers(&source);
                        if markers != count {
                            tracing::warn!(
                                module = %module_path,
                                markers,
                                registered = count,
                                "Marker count does not match registered tools"
                            );
                        }
                    }
                    discovered += count;
                }
                Err(e) => {
                    tracing::warn!(module = %module_path, error = %e, "Failed to load tool module");
                }
            }
        }

        tracing::info!(discovered, "Tool discovery finished");
        Ok(discovered)
    }

    /// Run every manifest entry. Used when no source tree is available.
    pub fn load_manifest(&self) -> usize {
        let mut discovered = 0;
        for module in &self.modules {
            match self.load_module(module) {
                Ok(count) => discovered += count,
                Err(e) => {
                    tracing::warn!(module = module.path, error = %e, "Failed to load tool module");
                }
            }
        }
        tracing::info!(discovered, modules = self.modules.len(), "Loaded tool manifest");
        discovered
    }

    fn find_module(&self, module_path: &str) -> Option<&ToolModule> {
        self.modules.iter().find(|m| {
            module_path == m.path || module_path.ends_with(&format!("::{}", m.path))
        })
    }

    fn load_module(&self, module: &ToolModule) -> Result<usize> {
        let tools = catch_unwind(AssertUnwindSafe(|| (module.register)(&self.registry)))
            .map_err(|panic| ToolError::Discovery {
                path: module.path.to_string(),
                detail: panic_message(panic.as_ref()),
            })??;

        let mut count = 0;
        for metadata in tools {
            let name = metadata.name.clone();
            match self.registry.register(metadata) {
                Ok(()) => count += 1,
                Err(e) => {
                    tracing::warn!(module = module.path, tool = %name, error = %e, "Failed to register tool");
                }
            }
        }
        tracing::debug!(module = module.path, tools = count, "Loaded tool module");
        Ok(count)
    }

    /// Summarise the registry and list integrity problems.
    pub fn validate(&self) -> ValidationReport {
        validate_registry(&self.registry)
    }
}

/// Summarise `registry` and list tools lacking a handler or description.
pub fn validate_registry(registry: &ToolRegistry) -> ValidationReport {
    let mut report = ValidationReport::default();
    for metadata in registry.list_all() {
        report.total_tools += 1;
        if registry.is_enabled(&metadata.name) {
            report.enabled_tools += 1;
        } else {
            report.disabled_tools += 1;
        }
        *report.categories.entry(metadata.category.clone()).or_insert(0) += 1;

        if metadata.handler.is_none() {
            report
                .issues
                .push(format!("Tool '{}' has no handler", metadata.name));
        }
        if metadata.description.trim().is_empty() {
            report
                .issues
                .push(format!("Tool '{}' has no description", metadata.name));
        }
    }
    report
}

/// Count markers in every source file under `root`.
pub fn scan_registrations(root: &Path) -> Result<DiscoveryReport> {
    let mut report = DiscoveryReport::default();
    for file in collect_source_files(root)? {
        report.scanned_files += 1;
        let source = match fs::read_to_string(&file) {
            Ok(source) => source,
            Err(e) => {
                tracing::warn!(file = %file.display(), error = %e, "Skipping unreadable source file");
                report.errors.push(format!("{}: {}", file.display(), e));
                continue;
            }
        };
        let count = count_markers(&source);
        if count > 0 {
            let key = file
                .strip_prefix(root)
                .unwrap_or(&file)
                .display()
                .to_string();
            report.files.insert(key, count);
            report.total += count;
        }
    }
    Ok(report)
}

/// Recursively list `.rs` files under `root`, sorted, honouring the
/// build-cache and test exclusions.
pub fn collect_source_files(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(ToolError::Discovery {
            path: root.display().to_string(),
            detail: "not a directory".to_string(),
        });
    }

    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            let file_type = entry.file_type()?;

            if file_type.is_dir() {
                if !name.starts_with('.') && !EXCLUDED_DIRS.contains(&name.as_str()) {
                    pending.push(path);
                }
            } else if file_type.is_file() && name.ends_with(".rs") && !is_test_file(&name) {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

fn is_test_file(file_name: &str) -> bool {
    let stem = file_name.strip_suffix(".rs").unwrap_or(file_name);
    stem == "tests"
        || stem == "test"
        || stem.starts_with("test_")
        || stem.ends_with("_test")
        || stem.ends_with("_tests")
}

/// Module path of `file` relative to `root`: `tools/echo.rs` becomes
/// `tools::echo`, `tools/mod.rs` becomes `tools`. `None` for crate roots.
pub fn module_path_for(root: &Path, file: &Path) -> Option<String> {
    let relative = file.strip_prefix(root).ok()?.with_extension("");
    let mut segments: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    if matches!(
        segments.last().map(String::as_str),
        Some("mod") | Some("lib") | Some("main")
    ) {
        segments.pop();
    }
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("::"))
    }
}

/// Count markers that annotate top-level functions in `source`.
pub fn count_markers(source: &str) -> usize {
    let mut depth: usize = 0;
    let mut pending = false;
    let mut count = 0;

    for line in source.lines() {
        let trimmed = line.trim();
        if depth == 0 {
            if MARKER.is_match(trimmed) {
                pending = true;
            } else if pending && FN_ITEM.is_match(trimmed) {
                count += 1;
                pending = false;
            } else if pending
                && !(trimmed.is_empty() || trimmed.starts_with("///") || trimmed.starts_with("#["))
            {
                pending = false;
            }
        }

        let (opened, closed) = brace_delta(trimmed);
        depth = (depth + opened).saturating_sub(closed);
    }
    count
}

/// Braces opened and closed on one line, ignoring comments, string and
/// char literals.
fn brace_delta(line: &str) -> (usize, usize) {
    let mut opened = 0;
    let mut closed = 0;
    let mut in_string = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if in_string {
            match c {
                '\\' => {
                    chars.next();
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '/' if chars.peek() == Some(&'/') => break,
            '"' => in_string = true,
            '\'' => {
                // Skip char literals such as '{' or '\''; lifetimes fall through.
                let mut lookahead = chars.clone();
                match (lookahead.next(), lookahead.next(), lookahead.next()) {
                    (Some('\\'), Some(_), Some('\'')) => {
                        chars.nth(2);
                    }
                    (Some(_), Some('\''), _) => {
                        chars.nth(1);
                    }
                    _ => {}
                }
            }
            '{' => opened += 1,
            '}' => closed += 1,
            _ => {}
        }
    }
    (opened, closed)
}
