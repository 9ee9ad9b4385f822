//! # Conveyor
//!
//! A host-managed, out-of-process plugin runtime for CI/CD engines.
//!
//! Plugins are independent executables. The host launches them, validates
//! a protocol handshake, supervises them with a liveness loop, hot-reloads
//! them on filesystem change, and invokes them through one uniform
//! `execute(action, params, opts)` surface — so the host never needs
//! per-plugin code to call per-plugin functionality.
//!
//! This crate is the facade: it re-exports the host side
//! ([`conveyor_host`]), the plugin side ([`conveyor_plugin`]), and the
//! shared model ([`conveyor_core`]), and ships three conformance plugin
//! executables (`shell_plugin`, `stdout_plugin`, `git_plugin`) that the
//! end-to-end suite drives.

pub use conveyor_core;
pub use conveyor_host;
pub use conveyor_plugin;
pub use conveyor_rpc;

/// The most common imports for host binaries and plugin executables.
pub mod prelude {
    pub use conveyor_core::{
        PluginInfo, PluginMetrics, PluginStatus, PluginType, RpcError, RuntimePluginConfig, codes,
    };
    pub use conveyor_host::{
        CallError, ConfigSource, HostError, ManagerConfig, MemoryConfigStore, PluginClient, PluginManager,
        PluginWatcher, SqlConfigStore, WatcherConfig,
    };
    pub use conveyor_plugin::{
        ActionInfo, ActionRegistry, HostConfig, PluginBase, PluginHandler, handler, serve,
    };
}
