//! Host-side error types.
//!
//! Every failure the manager surfaces is named per plugin: the slot name
//! plus the underlying cause. A failing plugin never blocks another from
//! being registered or invoked, and the host never panics on plugin
//! failure.

use std::path::PathBuf;

use thiserror::Error;

use conveyor_core::{ChannelError, HandshakeError, RpcError};

/// Errors surfaced by the plugin manager and watcher.
#[derive(Debug, Error)]
pub enum HostError {
    /// A second registration under an already-live name fails fast.
    #[error("plugin '{0}' is already registered")]
    DuplicateName(String),

    #[error("plugin '{0}' not found")]
    NotFound(String),

    #[error("plugin directory is not usable: {0}")]
    PluginDir(PathBuf),

    #[error("failed to spawn plugin '{name}' from {}: {source}", path.display())]
    Spawn {
        name: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The child did not prove it speaks the plugin protocol. It has
    /// already been killed.
    #[error("handshake with plugin '{name}' failed: {source}")]
    Handshake {
        name: String,
        #[source]
        source: HandshakeError,
    },

    /// The plugin rejected its configuration. It has already been killed.
    #[error("plugin '{name}' failed to initialize: {source}")]
    Init {
        name: String,
        #[source]
        source: RpcError,
    },

    #[error("channel to plugin '{name}' failed: {source}")]
    Channel {
        name: String,
        #[source]
        source: ChannelError,
    },

    /// A reload found its plugin file gone after the grace period; the
    /// load step was abandoned and the slot stays empty.
    #[error("plugin file vanished during reload: {}", .0.display())]
    SourceVanished(PathBuf),

    /// Best-effort bulk reload: every failed plugin with its cause.
    #[error("{}", format_reload_failures(.0))]
    ReloadAll(Vec<(String, String)>),

    #[error("watcher error: {0}")]
    Watch(String),
}

/// Result alias for host operations.
pub type HostResult<T> = Result<T, HostError>;

fn format_reload_failures(failures: &[(String, String)]) -> String {
    let list = failures
        .iter()
        .map(|(name, cause)| format!("{name}: {cause}"))
        .collect::<Vec<_>>()
        .join("; ");
    format!("reload failed for {} plugin(s): {list}", failures.len())
}

impl From<notify::Error> for HostError {
    fn from(err: notify::Error) -> Self {
        Self::Watch(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_reload_error_lists_every_failure() {
        let err = HostError::ReloadAll(vec![
            ("shell".into(), "handshake failed".into()),
            ("stdout".into(), "channel closed".into()),
        ]);
        let text = err.to_string();
        assert!(text.contains("2 plugin(s)"));
        assert!(text.contains("shell: handshake failed"));
        assert!(text.contains("stdout: channel closed"));
    }

    #[test]
    fn errors_carry_the_plugin_name() {
        let err = HostError::Init {
            name: "git".into(),
            source: RpcError::new(conveyor_core::codes::INIT_FAILED, "bad config"),
        };
        assert!(err.to_string().contains("git"));
        assert!(err.to_string().contains("bad config"));
    }
}
