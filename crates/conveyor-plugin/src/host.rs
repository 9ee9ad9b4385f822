//! Handle to the host-provided config capability.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use conveyor_rpc::{CallError, RpcPeer, methods};

/// Lets a plugin read its persistent configuration back out of the host.
///
/// The capability is served over the plugin's own RPC channel into the
/// host — there is no separate endpoint. All three queries return empty
/// strings rather than errors when a lookup finds nothing; the host does
/// no caching, so callers decide how often to ask.
#[derive(Clone)]
pub struct HostConfig {
    peer: Arc<RpcPeer>,
    timeout: Duration,
}

impl HostConfig {
    pub(crate) fn new(peer: Arc<RpcPeer>, timeout: Duration) -> Self {
        Self { peer, timeout }
    }

    /// The full config blob stored for `plugin_id`, as a JSON string.
    pub async fn query_config(&self, plugin_id: &str) -> Result<String, CallError> {
        let result = self
            .peer
            .call(
                methods::CONFIG_QUERY,
                json!({ "pluginId": plugin_id }),
                self.timeout,
            )
            .await?;
        Ok(result.as_str().unwrap_or_default().to_string())
    }

    /// One key inside the config blob for `plugin_id`, re-serialised.
    /// A missing key yields an empty string, not an error.
    pub async fn query_config_by_key(
        &self,
        plugin_id: &str,
        key: &str,
    ) -> Result<String, CallError> {
        let result = self
            .peer
            .call(
                methods::CONFIG_QUERY_BY_KEY,
                json!({ "pluginId": plugin_id, "key": key }),
                self.timeout,
            )
            .await?;
        Ok(result.as_str().unwrap_or_default().to_string())
    }

    /// Every stored config row, as a JSON array string.
    pub async fn list_configs(&self) -> Result<String, CallError> {
        let result = self
            .peer
            .call(methods::CONFIG_LIST, json!({}), self.timeout)
            .await?;
        Ok(result.as_str().unwrap_or_default().to_string())
    }
}
