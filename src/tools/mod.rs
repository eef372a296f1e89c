/// Tools Module
///
/// Every tool module exports a `register` function returning the tools it
/// provides. `manifest()` lists those functions by module path; discovery
/// matches source files against it.
///
/// To add a tool, create a module with a `register` function, mark each
/// handler with `// @tool`, and add the module to the manifest.

use crate::core::discovery::ToolModule;

pub mod echo;
pub mod management;
pub mod time;

pub fn manifest() -> Vec<ToolModule> {
    vec![
        ToolModule {
            path: "tools::echo",
            register: echo::register,
        },
        ToolModule {
            path: "tools::time",
            register: time::register,
        },
        ToolModule {
            path: "tools::management",
            register: management::register,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config_store::JsonConfigStore;
    use crate::core::discovery::ToolDiscovery;
    use crate::core::registry::ToolRegistry;
    use std::path::Path;
    use std::sync::Arc;

    fn registry() -> Arc<ToolRegistry> {
        Arc::new(ToolRegistry::new(Arc::new(JsonConfigStore::in_memory()), true))
    }

    #[test]
    fn manifest_loads_every_tool() {
        let registry = registry();
        let discovery = ToolDiscovery::new(registry.clone(), manifest());

        assert_eq!(discovery.load_manifest(), 11);
        assert!(discovery.validate().is_valid());
        assert_eq!(registry.categories(), vec!["config", "utility"]);
    }

    #[test]
    fn source_discovery_matches_manifest() {
        let registry = registry();
        let discovery = ToolDiscovery::new(registry.clone(), manifest());
        let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("src");

        let discovered = discovery.discover_and_import(&root).unwrap();

        assert_eq!(discovered, 11);
        let report = discovery.scan(&root).unwrap();
        for module in ["echo.rs", "time.rs", "management.rs"] {
            let key = report
                .files
                .keys()
                .find(|file| file.ends_with(module))
                .unwrap();
            assert!(report.files[key] >= 1);
        }
    }
}
