//! # Conveyor Core
//!
//! Shared data model for the Conveyor plugin runtime.
//!
//! Conveyor runs plugins as independent child processes supervised by the
//! host. This crate defines the types both sides agree on:
//!
//! - **Identity**: [`PluginInfo`] and the advisory [`PluginType`] kind.
//! - **Configuration**: [`RuntimePluginConfig`], the host-side registration
//!   record whose `config` blob is handed to the plugin verbatim on init.
//! - **Observability**: [`PluginMetrics`] snapshots and [`PluginStatus`].
//! - **Failures**: [`RpcError`] (structured business errors carried inside
//!   responses) and the channel/handshake error taxonomy.
//!
//! Everything here serialises as camelCase JSON; payloads that carry user
//! data stay opaque (`serde_json::Value`) and are never validated by the
//! host.

mod config;
mod error;
mod info;
mod metrics;

pub use config::RuntimePluginConfig;
pub use error::{ChannelError, HandshakeError, RpcError, codes};
pub use info::{PluginInfo, PluginType, UnknownPluginType};
pub use metrics::{PluginMetrics, PluginStatus};
