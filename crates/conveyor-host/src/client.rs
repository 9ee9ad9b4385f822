//! Host-side handle to one plugin child.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};
use tokio::io::BufReader;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use conveyor_core::{ChannelError, PluginInfo, PluginMetrics, RuntimePluginConfig};
use conveyor_rpc::{CallError, RpcPeer, ServiceHandler, handshake, methods};

use crate::error::HostError;

/// Environment variable carrying `RuntimePluginConfig::task_id` into the
/// child for log correlation.
pub const TASK_ID_ENV: &str = "CONVEYOR_TASK_ID";

/// Process-unique instance counter. Two loads of the same executable get
/// different ids, which is how observers tell a reload happened.
static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

// =============================================================================
// Spawn
// =============================================================================

/// Spawns the plugin executable at `path`, validates its greeting, and
/// wraps the channel in a [`PluginClient`].
///
/// The child inherits the host environment plus the config's entries and
/// the magic cookie. Any handshake failure kills the child before
/// returning. The returned [`Child`] is owned by the manager's slot; the
/// client only owns the channel.
pub(crate) async fn spawn_plugin(
    name: &str,
    path: &Path,
    config: RuntimePluginConfig,
    handshake_timeout: Duration,
    rpc_timeout: Duration,
    capability: Arc<dyn ServiceHandler>,
) -> Result<(PluginClient, Child), HostError> {
    let spawn_err = |source: std::io::Error| HostError::Spawn {
        name: name.to_string(),
        path: path.to_path_buf(),
        source,
    };

    let mut command = Command::new(path);
    command
        .envs(&config.environment)
        .env(handshake::MAGIC_COOKIE_KEY, handshake::MAGIC_COOKIE_VALUE)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .kill_on_drop(true);
    if let Some(task_id) = &config.task_id {
        command.env(TASK_ID_ENV, task_id);
    }

    let mut child = command.spawn().map_err(spawn_err)?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| spawn_err(std::io::Error::other("child stdin not captured")))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| spawn_err(std::io::Error::other("child stdout not captured")))?;

    let mut reader = BufReader::new(stdout);
    if let Err(source) = handshake::read_greeting(&mut reader, handshake_timeout).await {
        warn!(plugin = %name, path = %path.display(), error = %source, "handshake rejected");
        let _ = child.kill().await;
        return Err(HostError::Handshake {
            name: name.to_string(),
            source,
        });
    }

    let peer = RpcPeer::spawn(reader, stdin, capability);
    let client = PluginClient::new(name, path, config, peer, rpc_timeout);
    debug!(plugin = %name, pid = ?child.id(), "plugin child started");
    Ok((client, child))
}

// =============================================================================
// PluginClient
// =============================================================================

/// One per registered plugin: owns the RPC channel and the per-client
/// health bookkeeping. The child process handle lives in the manager's
/// slot, not here.
///
/// Any channel-level failure flips `connected` off and scores
/// `error_count`; a successful ping resets the count and refreshes
/// `last_heartbeat`. Business errors touch neither.
pub struct PluginClient {
    name: String,
    instance_id: u64,
    info: RwLock<PluginInfo>,
    config: RuntimePluginConfig,
    plugin_path: PathBuf,
    peer: RpcPeer,
    rpc_timeout: Duration,
    connected: AtomicBool,
    last_heartbeat: Mutex<Option<Instant>>,
    error_count: AtomicU64,
}

impl PluginClient {
    pub(crate) fn new(
        name: &str,
        path: &Path,
        config: RuntimePluginConfig,
        peer: RpcPeer,
        rpc_timeout: Duration,
    ) -> Self {
        // Until get_info succeeds, identity falls back to the config.
        let fallback = PluginInfo::new(name, config.version.clone(), config.plugin_type);
        Self {
            name: name.to_string(),
            instance_id: NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed),
            info: RwLock::new(fallback),
            config,
            plugin_path: path.to_path_buf(),
            peer,
            rpc_timeout,
            connected: AtomicBool::new(true),
            last_heartbeat: Mutex::new(None),
            error_count: AtomicU64::new(0),
        }
    }

    // ─── Accessors ───────────────────────────────────────────────────────

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Process-unique id of this load; changes on every reload.
    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    /// Last known identity (self-declared, or config fallback).
    pub fn info(&self) -> PluginInfo {
        self.info.read().clone()
    }

    pub fn config(&self) -> &RuntimePluginConfig {
        &self.config
    }

    /// The on-disk executable, distinct from the logical plugin name.
    pub fn plugin_path(&self) -> &Path {
        &self.plugin_path
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.peer.is_connected()
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::SeqCst)
    }

    pub fn last_heartbeat(&self) -> Option<Instant> {
        *self.last_heartbeat.lock()
    }

    // ─── RPC wrappers ────────────────────────────────────────────────────

    async fn call(&self, method: &str, params: Value) -> Result<Value, CallError> {
        let outcome = self.peer.call(method, params, self.rpc_timeout).await;
        if let Err(err) = &outcome
            && err.is_channel()
        {
            self.connected.store(false, Ordering::SeqCst);
            self.error_count.fetch_add(1, Ordering::SeqCst);
        }
        outcome
    }

    fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, CallError> {
        serde_json::from_value(value)
            .map_err(|err| CallError::Channel(ChannelError::Serialize(err.to_string())))
    }

    /// Cheap liveness probe. Success resets the error score and refreshes
    /// the heartbeat timestamp; any failure scores one error.
    pub async fn ping(&self) -> Result<(), CallError> {
        match self.call(methods::PING, Value::Null).await {
            Ok(_) => {
                self.error_count.store(0, Ordering::SeqCst);
                *self.last_heartbeat.lock() = Some(Instant::now());
                Ok(())
            }
            Err(err) => {
                // Channel failures were already scored inside call().
                if !err.is_channel() {
                    self.error_count.fetch_add(1, Ordering::SeqCst);
                }
                Err(err)
            }
        }
    }

    /// Asks the plugin for its self-declared identity and caches it.
    pub async fn get_info(&self) -> Result<PluginInfo, CallError> {
        let value = self.call(methods::GET_INFO, Value::Null).await?;
        let info: PluginInfo = Self::decode(value)?;
        *self.info.write() = info.clone();
        Ok(info)
    }

    pub async fn get_metrics(&self) -> Result<PluginMetrics, CallError> {
        let value = self.call(methods::GET_METRICS, Value::Null).await?;
        Self::decode(value)
    }

    /// Hands the opaque config blob to the plugin.
    pub async fn init(&self, config: &Value) -> Result<(), CallError> {
        self.call(methods::INIT, json!({ "config": config }))
            .await
            .map(|_| ())
    }

    /// Best-effort resource release before the child is killed.
    pub async fn cleanup(&self) -> Result<(), CallError> {
        self.call(methods::CLEANUP, Value::Null).await.map(|_| ())
    }

    /// Invokes one action through the uniform execute surface. Business
    /// failures come back as [`CallError::Remote`] with the channel intact.
    pub async fn call_method(
        &self,
        action: &str,
        params: Value,
        opts: Value,
    ) -> Result<Value, CallError> {
        self.call(
            methods::EXECUTE,
            json!({ "action": action, "params": params, "opts": opts }),
        )
        .await
    }

    /// Tears down the channel.
    pub fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.peer.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conveyor_core::{PluginType, RpcError};

    struct FakePlugin;

    #[async_trait]
    impl ServiceHandler for FakePlugin {
        async fn handle(&self, method: &str, _params: Value) -> Result<Value, RpcError> {
            match method {
                methods::PING => Ok(json!("pong")),
                methods::GET_INFO => Ok(json!({
                    "name": "fake",
                    "version": "2.0.0",
                    "type": "notify",
                })),
                methods::EXECUTE => Err(RpcError::new(1003, "business failure")),
                "slow" => {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(Value::Null)
                }
                other => Err(RpcError::method_not_found(other)),
            }
        }
    }

    struct NoReplies;

    #[async_trait]
    impl ServiceHandler for NoReplies {
        async fn handle(&self, _method: &str, _params: Value) -> Result<Value, RpcError> {
            // Stall forever so host-side calls run into their deadline.
            std::future::pending().await
        }
    }

    struct NoCapability;

    #[async_trait]
    impl ServiceHandler for NoCapability {
        async fn handle(&self, method: &str, _params: Value) -> Result<Value, RpcError> {
            Err(RpcError::method_not_found(method))
        }
    }

    /// Builds a client whose "child" is an in-process peer serving
    /// `handler`. The plugin-side peer is returned so it stays alive.
    fn client_over(
        handler: Arc<dyn ServiceHandler>,
        rpc_timeout: Duration,
    ) -> (PluginClient, RpcPeer) {
        let (host_io, plugin_io) = tokio::io::duplex(64 * 1024);
        let (pr, pw) = tokio::io::split(plugin_io);
        let plugin_peer = RpcPeer::spawn(pr, pw, handler);
        let (hr, hw) = tokio::io::split(host_io);
        let peer = RpcPeer::spawn(hr, hw, Arc::new(NoCapability));
        let client = PluginClient::new(
            "fake",
            Path::new("/tmp/fake_1.0.0"),
            RuntimePluginConfig::new("fake"),
            peer,
            rpc_timeout,
        );
        (client, plugin_peer)
    }

    #[tokio::test]
    async fn ping_refreshes_heartbeat_and_resets_errors() {
        let (client, _plugin) = client_over(Arc::new(FakePlugin), Duration::from_secs(1));
        assert!(client.last_heartbeat().is_none());
        client.ping().await.unwrap();
        assert!(client.last_heartbeat().is_some());
        assert_eq!(client.error_count(), 0);
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn business_error_does_not_affect_health() {
        let (client, _plugin) = client_over(Arc::new(FakePlugin), Duration::from_secs(1));
        let err = client
            .call_method("anything", Value::Null, Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Remote(_)));
        assert!(client.is_connected());
        assert_eq!(client.error_count(), 0);
        client.ping().await.unwrap();
    }

    #[tokio::test]
    async fn channel_timeout_marks_disconnected_and_scores() {
        let (client, _plugin) = client_over(Arc::new(NoReplies), Duration::from_millis(50));
        let err = client.ping().await.unwrap_err();
        assert!(err.is_channel());
        assert!(!client.is_connected());
        assert_eq!(client.error_count(), 1);
    }

    #[tokio::test]
    async fn get_info_caches_the_declared_identity() {
        let (client, _plugin) = client_over(Arc::new(FakePlugin), Duration::from_secs(1));
        // Fallback identity before the first get_info.
        assert_eq!(client.info().plugin_type, PluginType::Unspecified);
        let info = client.get_info().await.unwrap();
        assert_eq!(info.version, "2.0.0");
        assert_eq!(client.info().plugin_type, PluginType::Notify);
    }
}
