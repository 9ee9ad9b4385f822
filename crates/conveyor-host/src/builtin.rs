//! Process-wide registry of builtin plugins.
//!
//! A host binary that bundles plugin executables can contribute them here
//! with [`builtin_plugin!`](crate::builtin_plugin) instead of dropping
//! files into the plugin directory. The registry is a second source of
//! truth consulted exactly once, at
//! [`load_plugins_from_dir`](crate::PluginManager::load_plugins_from_dir);
//! the manager's own maps remain the only authority for loaded state.

use std::path::PathBuf;

use linkme::distributed_slice;

use conveyor_core::RuntimePluginConfig;

/// Descriptor for a plugin executable bundled with the host binary.
#[derive(Debug, Clone)]
pub struct BuiltinPlugin {
    pub name: String,
    pub path: PathBuf,
    pub config: RuntimePluginConfig,
}

/// Factory contributed by each registration site.
pub type BuiltinPluginFn = fn() -> BuiltinPlugin;

/// The distributed registration slice. Prefer the
/// [`builtin_plugin!`](crate::builtin_plugin) macro over touching this
/// directly.
#[distributed_slice]
pub static BUILTIN_PLUGINS: [BuiltinPluginFn];

/// Materialises every registered descriptor.
pub(crate) fn builtin_plugins() -> Vec<BuiltinPlugin> {
    BUILTIN_PLUGINS.iter().map(|factory| factory()).collect()
}

/// Registers a builtin plugin with the process-wide registry.
///
/// ```rust,ignore
/// builtin_plugin!(BUNDLED_SHELL, || BuiltinPlugin {
///     name: "shell".into(),
///     path: bundled_dir().join("shell_plugin"),
///     config: RuntimePluginConfig::new("shell"),
/// });
/// ```
#[macro_export]
macro_rules! builtin_plugin {
    ($ident:ident, $factory:expr) => {
        #[$crate::linkme::distributed_slice($crate::BUILTIN_PLUGINS)]
        #[linkme(crate = $crate::linkme)]
        static $ident: $crate::BuiltinPluginFn = {
            fn __factory() -> $crate::BuiltinPlugin {
                let factory: fn() -> $crate::BuiltinPlugin = $factory;
                factory()
            }
            __factory
        };
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::builtin_plugin!(TEST_BUILTIN, || BuiltinPlugin {
        name: "bundled-test".into(),
        path: PathBuf::from("/nonexistent/bundled-test"),
        config: RuntimePluginConfig::new("bundled-test"),
    });

    #[test]
    fn registered_entries_are_visible() {
        let plugins = builtin_plugins();
        assert!(plugins.iter().any(|p| p.name == "bundled-test"));
    }
}
