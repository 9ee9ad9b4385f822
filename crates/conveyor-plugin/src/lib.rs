//! # Conveyor Plugin
//!
//! Everything a plugin executable needs to speak the Conveyor contract.
//!
//! A plugin is an ordinary binary. It builds a type that implements
//! [`PluginHandler`], registers its actions in the embedded
//! [`ActionRegistry`], and hands itself to [`serve`], which performs the
//! handshake on stdio and serves the RPC surface until the host closes the
//! pipe.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use conveyor_plugin::{ActionRegistry, PluginBase, PluginHandler, handler, serve};
//!
//! struct EchoPlugin { base: PluginBase }
//!
//! impl EchoPlugin {
//!     fn new() -> Self {
//!         let base = PluginBase::new();
//!         base.registry().register(
//!             ActionInfo::new("echo", "returns its params"),
//!             handler(|params, _opts| async move { Ok(params) }),
//!         );
//!         Self { base }
//!     }
//! }
//!
//! impl PluginHandler for EchoPlugin {
//!     fn info(&self) -> PluginInfo {
//!         PluginInfo::new("echo", "1.0.0", PluginType::Custom)
//!     }
//!     fn base(&self) -> &PluginBase {
//!         &self.base
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     serve(Arc::new(EchoPlugin::new())).await?;
//!     Ok(())
//! }
//! ```

mod base;
mod host;
mod registry;
mod serve;

pub use base::{PluginBase, PluginHandler};
pub use host::HostConfig;
pub use registry::{ActionHandler, ActionInfo, ActionRegistry, handler};
pub use serve::{ServeError, serve, serve_connection};

pub use conveyor_core::{PluginInfo, PluginMetrics, PluginStatus, PluginType, RpcError};
