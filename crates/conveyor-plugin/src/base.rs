//! Plugin base and the uniform plugin contract.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;

use conveyor_core::{PluginInfo, PluginMetrics, PluginStatus, RpcError};

use crate::registry::ActionRegistry;

// =============================================================================
// PluginBase
// =============================================================================

struct BaseState {
    status: PluginStatus,
    /// The config blob last applied by a successful init.
    applied_config: Option<Value>,
    initialized_at: Option<Instant>,
    call_count: u64,
    error_count: u64,
    last_error: Option<String>,
    last_call_time: Option<chrono::DateTime<Utc>>,
    custom_metrics: HashMap<String, Value>,
}

/// The state every plugin embeds: its action registry plus the metrics and
/// init bookkeeping the runtime maintains on its behalf.
///
/// Counters are updated on every [`execute`](Self::execute): `call_count`
/// unconditionally, `error_count`/`last_error` on business failures.
/// Status follows the lifecycle — `unknown` until init, `running` after a
/// successful init, `error` after a rejected one.
pub struct PluginBase {
    registry: ActionRegistry,
    state: Mutex<BaseState>,
}

impl Default for PluginBase {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginBase {
    pub fn new() -> Self {
        Self {
            registry: ActionRegistry::new(),
            state: Mutex::new(BaseState {
                status: PluginStatus::Unknown,
                applied_config: None,
                initialized_at: None,
                call_count: 0,
                error_count: 0,
                last_error: None,
                last_call_time: None,
                custom_metrics: HashMap::new(),
            }),
        }
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    /// Routes an action through the registry, maintaining the counters.
    pub async fn execute(
        &self,
        action: &str,
        params: Value,
        opts: Value,
    ) -> Result<Value, RpcError> {
        {
            let mut state = self.state.lock();
            state.call_count += 1;
            state.last_call_time = Some(Utc::now());
        }
        let outcome = self.registry.execute(action, params, opts).await;
        if let Err(err) = &outcome {
            let mut state = self.state.lock();
            state.error_count += 1;
            state.last_error = Some(err.message.clone());
        }
        outcome
    }

    /// Whether an init with `config` still needs to run. A config equal to
    /// the one already applied makes init idempotent.
    pub fn needs_init(&self, config: &Value) -> bool {
        let state = self.state.lock();
        !(state.status == PluginStatus::Running && state.applied_config.as_ref() == Some(config))
    }

    /// Records a successful init of `config`.
    pub fn mark_initialized(&self, config: Value) {
        let mut state = self.state.lock();
        state.status = PluginStatus::Running;
        state.applied_config = Some(config);
        state.initialized_at = Some(Instant::now());
    }

    /// Records a rejected init.
    pub fn mark_init_failed(&self, error: &RpcError) {
        let mut state = self.state.lock();
        state.status = PluginStatus::Error;
        state.error_count += 1;
        state.last_error = Some(error.message.clone());
    }

    /// Publishes one plugin-defined metric.
    pub fn set_custom_metric(&self, key: impl Into<String>, value: Value) {
        self.state.lock().custom_metrics.insert(key.into(), value);
    }

    /// Assembles a metrics snapshot for `info`.
    pub fn snapshot(&self, info: &PluginInfo) -> PluginMetrics {
        let state = self.state.lock();
        PluginMetrics {
            name: info.name.clone(),
            plugin_type: info.plugin_type,
            version: info.version.clone(),
            status: state.status,
            uptime: state
                .initialized_at
                .map(|at| at.elapsed().as_secs())
                .unwrap_or(0),
            call_count: state.call_count,
            error_count: state.error_count,
            last_error: state.last_error.clone(),
            last_call_time: state.last_call_time,
            custom_metrics: state.custom_metrics.clone(),
        }
    }
}

// =============================================================================
// PluginHandler
// =============================================================================

/// The uniform contract every plugin implements.
///
/// Only [`info`](Self::info) and [`base`](Self::base) are mandatory. The
/// lifecycle hooks default to explicit no-ops, and [`execute`](Self::execute)
/// defaults to registry dispatch through the base so the metrics counters
/// stay correct; a plugin overriding it takes over that bookkeeping.
#[async_trait]
pub trait PluginHandler: Send + Sync + 'static {
    /// Identity this plugin declares. Must be stable for the process
    /// lifetime — the host round-trips it byte for byte.
    fn info(&self) -> PluginInfo;

    /// The embedded [`PluginBase`].
    fn base(&self) -> &PluginBase;

    /// Applies the opaque config blob. Rejecting it marks the plugin
    /// unhealthy and the host will unload it.
    async fn init(&self, _config: Value) -> Result<(), RpcError> {
        Ok(())
    }

    /// Releases resources before shutdown. Best-effort; may run under the
    /// host's shutdown deadline.
    async fn cleanup(&self) -> Result<(), RpcError> {
        Ok(())
    }

    async fn execute(&self, action: &str, params: Value, opts: Value) -> Result<Value, RpcError> {
        self.base().execute(action, params, opts).await
    }

    /// Receives the host capability handle once the channel is up. Plugins
    /// that never read their persistent config can ignore it.
    fn attach_host(&self, _host: crate::HostConfig) {}

    /// Current metrics snapshot.
    fn metrics(&self) -> PluginMetrics {
        self.base().snapshot(&self.info())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ActionInfo, handler};
    use serde_json::json;

    struct TestPlugin {
        base: PluginBase,
    }

    impl TestPlugin {
        fn new() -> Self {
            let base = PluginBase::new();
            base.registry().register(
                ActionInfo::new("ok", ""),
                handler(|_p, _o| async move { Ok(json!("fine")) }),
            );
            base.registry().register(
                ActionInfo::new("bad", ""),
                handler(|_p, _o| async move { Err(RpcError::new(9, "broken")) }),
            );
            Self { base }
        }
    }

    #[async_trait]
    impl PluginHandler for TestPlugin {
        fn info(&self) -> PluginInfo {
            PluginInfo::new("test", "0.1.0", conveyor_core::PluginType::Custom)
        }
        fn base(&self) -> &PluginBase {
            &self.base
        }
    }

    #[tokio::test]
    async fn counters_track_calls_and_errors() {
        let plugin = TestPlugin::new();
        plugin
            .execute("ok", Value::Null, Value::Null)
            .await
            .unwrap();
        plugin
            .execute("bad", Value::Null, Value::Null)
            .await
            .unwrap_err();
        plugin
            .execute("nope", Value::Null, Value::Null)
            .await
            .unwrap_err();

        let metrics = plugin.metrics();
        assert_eq!(metrics.call_count, 3);
        assert_eq!(metrics.error_count, 2);
        assert!(metrics.last_error.unwrap().contains("unknown action"));
        assert!(metrics.last_call_time.is_some());
    }

    #[tokio::test]
    async fn init_bookkeeping_drives_status() {
        let plugin = TestPlugin::new();
        assert_eq!(plugin.metrics().status, PluginStatus::Unknown);

        let config = json!({"a": 1});
        assert!(plugin.base().needs_init(&config));
        plugin.base().mark_initialized(config.clone());
        assert_eq!(plugin.metrics().status, PluginStatus::Running);

        // Same config again: idempotent.
        assert!(!plugin.base().needs_init(&config));
        // A different config re-runs init.
        assert!(plugin.base().needs_init(&json!({"a": 2})));
    }

    #[tokio::test]
    async fn failed_init_is_an_error_status() {
        let plugin = TestPlugin::new();
        plugin
            .base()
            .mark_init_failed(&RpcError::new(conveyor_core::codes::INIT_FAILED, "bad config"));
        let metrics = plugin.metrics();
        assert_eq!(metrics.status, PluginStatus::Error);
        assert_eq!(metrics.last_error.as_deref(), Some("bad config"));
    }

    #[test]
    fn custom_metrics_surface_in_snapshot() {
        let plugin = TestPlugin::new();
        plugin.base().set_custom_metric("queueDepth", json!(3));
        assert_eq!(plugin.metrics().custom_metrics["queueDepth"], json!(3));
    }
}
