//! # Conveyor Host
//!
//! The host side of the Conveyor plugin runtime.
//!
//! ## Architecture
//!
//! - [`PluginManager`] — the central coordinator. Spawns plugin child
//!   processes, validates the handshake, drives `init`/`cleanup`, and
//!   routes `execute` calls. One [`PluginClient`] per live plugin.
//! - [`PluginWatcher`] — turns filesystem events in the plugin directory
//!   into debounced load / unload / reload operations on the manager.
//! - [`ConfigSource`] — the read-only config capability plugins can call
//!   back into, served over each plugin's own RPC channel.
//!
//! ```text
//! ┌──────────────┐  events   ┌───────────────┐  spawn/rpc   ┌─────────────┐
//! │ PluginWatcher│──────────▶│ PluginManager │─────────────▶│ plugin proc │
//! └──────────────┘           │  name→client  │◀─────────────│ (child)     │
//!                            │  name→child   │  host.config │             │
//!                            └───────────────┘              └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use conveyor_host::{ManagerConfig, MemoryConfigStore, PluginManager, PluginWatcher, WatcherConfig};
//!
//! let manager = Arc::new(PluginManager::new(
//!     ManagerConfig::new("/var/lib/conveyor/plugins"),
//!     Arc::new(MemoryConfigStore::new()),
//! ));
//! manager.load_plugins_from_dir().await?;
//! Arc::clone(&manager).start_heartbeat(Duration::from_secs(30));
//!
//! let mut watcher = PluginWatcher::new(Arc::clone(&manager), WatcherConfig::default());
//! watcher.start(&[manager.config().plugin_dir.clone()])?;
//!
//! let result = manager
//!     .get_plugin("shell").await.unwrap()
//!     .call_method("command", serde_json::json!({"command": "echo hi"}), serde_json::Value::Null)
//!     .await?;
//! ```

mod accessor;
mod builtin;
mod client;
mod error;
mod manager;
mod watcher;

pub use accessor::{ConfigSource, ConfigSourceError, MemoryConfigStore, SqlConfigStore};
pub use builtin::{BUILTIN_PLUGINS, BuiltinPlugin, BuiltinPluginFn};
pub use client::{PluginClient, TASK_ID_ENV};
pub use error::{HostError, HostResult};
pub use manager::{ManagerConfig, ManagerStats, PluginManager};
pub use watcher::{PluginWatcher, WatcherConfig};

pub use conveyor_core::{
    PluginInfo, PluginMetrics, PluginStatus, PluginType, RpcError, RuntimePluginConfig,
};
pub use conveyor_rpc::CallError;

// Macro-internal re-export (needed by builtin_plugin! at call sites).
#[doc(hidden)]
pub use linkme;
