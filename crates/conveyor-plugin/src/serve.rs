//! The plugin-process serving harness.
//!
//! [`serve`] is what a plugin binary calls from `main`: it verifies the
//! magic cookie in the environment (refusing to start outside a Conveyor
//! host), writes the greeting line, then serves the RPC surface over
//! stdin/stdout until the host closes the pipe. On `cleanup` the plugin
//! releases its resources and acknowledges; the process may exit
//! afterwards — the host is already tearing it down.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use conveyor_core::{HandshakeError, RpcError};
use conveyor_rpc::proto::{ExecuteParams, InitParams};
use conveyor_rpc::{RpcPeer, ServiceHandler, handshake, methods};

use crate::base::PluginHandler;
use crate::host::HostConfig;

/// Deadline for calls the plugin makes back into the host.
const HOST_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Why [`serve`] could not start.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error("failed to write greeting: {0}")]
    Io(#[from] std::io::Error),
}

/// Serves `plugin` on stdio until the host closes the channel.
pub async fn serve(plugin: Arc<dyn PluginHandler>) -> Result<(), ServeError> {
    handshake::verify_cookie_env()?;

    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(handshake::greeting_line().as_bytes())
        .await?;
    stdout.flush().await?;

    let name = plugin.info().name;
    info!(plugin = %name, "serving plugin");
    serve_connection(plugin, tokio::io::stdin(), stdout, HOST_CALL_TIMEOUT).await;
    debug!(plugin = %name, "host closed the channel");
    Ok(())
}

/// Serves `plugin` over an arbitrary pipe. Returns when the channel dies.
///
/// Split out from [`serve`] so the harness can be exercised in-process.
pub async fn serve_connection<R, W>(
    plugin: Arc<dyn PluginHandler>,
    reader: R,
    writer: W,
    host_call_timeout: Duration,
) where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let service = Arc::new(PluginService {
        plugin: Arc::clone(&plugin),
    });
    let peer = Arc::new(RpcPeer::spawn(reader, writer, service));
    plugin.attach_host(HostConfig::new(Arc::clone(&peer), host_call_timeout));
    peer.closed().await;
}

// =============================================================================
// Request dispatch
// =============================================================================

struct PluginService {
    plugin: Arc<dyn PluginHandler>,
}

fn parse<T: DeserializeOwned>(params: Value) -> Result<T, RpcError> {
    serde_json::from_value(params).map_err(|err| RpcError::invalid_params(err.to_string()))
}

fn encode<T: serde::Serialize>(value: T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|err| RpcError::internal(err.to_string()))
}

#[async_trait]
impl ServiceHandler for PluginService {
    async fn handle(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            // Liveness only — must never block on plugin work. The peer
            // already runs each request on its own task.
            methods::PING => Ok(json!("pong")),

            methods::GET_INFO => encode(self.plugin.info()),

            methods::GET_METRICS => encode(self.plugin.metrics()),

            methods::INIT => {
                let InitParams { config } = parse(params)?;
                if !self.plugin.base().needs_init(&config) {
                    return Ok(json!("already initialized"));
                }
                match self.plugin.init(config.clone()).await {
                    Ok(()) => {
                        self.plugin.base().mark_initialized(config);
                        Ok(json!("initialized"))
                    }
                    Err(err) => {
                        self.plugin.base().mark_init_failed(&err);
                        Err(err)
                    }
                }
            }

            methods::CLEANUP => {
                self.plugin.cleanup().await?;
                Ok(json!("cleaned up"))
            }

            methods::EXECUTE => {
                let ExecuteParams {
                    action,
                    params,
                    opts,
                } = parse(params)?;
                self.plugin.execute(&action, params, opts).await
            }

            other => Err(RpcError::method_not_found(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::PluginBase;
    use crate::registry::{ActionInfo, handler};
    use conveyor_core::{PluginInfo, PluginType};
    use std::sync::OnceLock;

    struct EchoPlugin {
        base: PluginBase,
        host: Arc<OnceLock<HostConfig>>,
    }

    impl EchoPlugin {
        fn new() -> Self {
            let base = PluginBase::new();
            let host: Arc<OnceLock<HostConfig>> = Arc::new(OnceLock::new());

            base.registry().register(
                ActionInfo::new("echo", "returns its params"),
                handler(|params, _opts| async move { Ok(params) }),
            );
            let slot = Arc::clone(&host);
            base.registry().register(
                ActionInfo::new("lookup", "reads own config from the host"),
                handler(move |params, _opts| {
                    let slot = Arc::clone(&slot);
                    async move {
                        let host = slot
                            .get()
                            .cloned()
                            .ok_or_else(|| RpcError::internal("host capability missing"))?;
                        let id = params
                            .get("id")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string();
                        let config = host
                            .query_config(&id)
                            .await
                            .map_err(|err| RpcError::internal(err.to_string()))?;
                        Ok(json!(config))
                    }
                }),
            );

            Self { base, host }
        }
    }

    #[async_trait]
    impl PluginHandler for EchoPlugin {
        fn info(&self) -> PluginInfo {
            PluginInfo::new("echo", "1.2.3", PluginType::Custom).with_description("test plugin")
        }
        fn base(&self) -> &PluginBase {
            &self.base
        }
        fn attach_host(&self, host: HostConfig) {
            let _ = self.host.set(host);
        }
    }

    struct RejectingPlugin {
        base: PluginBase,
    }

    #[async_trait]
    impl PluginHandler for RejectingPlugin {
        fn info(&self) -> PluginInfo {
            PluginInfo::new("reject", "0.0.1", PluginType::Custom)
        }
        fn base(&self) -> &PluginBase {
            &self.base
        }
        async fn init(&self, _config: Value) -> Result<(), RpcError> {
            Err(RpcError::new(
                conveyor_core::codes::INIT_FAILED,
                "config rejected",
            ))
        }
    }

    struct HostSide;

    #[async_trait]
    impl ServiceHandler for HostSide {
        async fn handle(&self, method: &str, _params: Value) -> Result<Value, RpcError> {
            match method {
                methods::CONFIG_QUERY => Ok(json!(r#"{"shell":"/bin/sh"}"#)),
                other => Err(RpcError::method_not_found(other)),
            }
        }
    }

    /// Serves `plugin` over a duplex pipe and returns the host-side peer.
    fn host_for(plugin: Arc<dyn PluginHandler>) -> Arc<RpcPeer> {
        let (host_io, plugin_io) = tokio::io::duplex(64 * 1024);
        let (plugin_read, plugin_write) = tokio::io::split(plugin_io);
        tokio::spawn(serve_connection(
            plugin,
            plugin_read,
            plugin_write,
            Duration::from_secs(1),
        ));
        let (host_read, host_write) = tokio::io::split(host_io);
        Arc::new(RpcPeer::spawn(host_read, host_write, Arc::new(HostSide)))
    }

    const T: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn ping_answers_pong() {
        let host = host_for(Arc::new(EchoPlugin::new()));
        let result = host.call(methods::PING, Value::Null, T).await.unwrap();
        assert_eq!(result, json!("pong"));
    }

    #[tokio::test]
    async fn get_info_round_trips_identity() {
        let plugin = EchoPlugin::new();
        let declared = plugin.info();
        let host = host_for(Arc::new(plugin));
        let result = host.call(methods::GET_INFO, Value::Null, T).await.unwrap();
        let wire: PluginInfo = serde_json::from_value(result).unwrap();
        assert_eq!(wire, declared);
    }

    #[tokio::test]
    async fn init_is_idempotent_for_equal_config() {
        let host = host_for(Arc::new(EchoPlugin::new()));
        let config = json!({ "config": { "retries": 2 } });
        let first = host.call(methods::INIT, config.clone(), T).await.unwrap();
        assert_eq!(first, json!("initialized"));
        let second = host.call(methods::INIT, config, T).await.unwrap();
        assert_eq!(second, json!("already initialized"));
    }

    #[tokio::test]
    async fn rejected_init_surfaces_and_marks_error() {
        let plugin = Arc::new(RejectingPlugin {
            base: PluginBase::new(),
        });
        let host = host_for(Arc::clone(&plugin) as Arc<dyn PluginHandler>);
        let err = host
            .call(methods::INIT, json!({ "config": {} }), T)
            .await
            .unwrap_err();
        match err {
            conveyor_rpc::CallError::Remote(rpc) => {
                assert_eq!(rpc.code, conveyor_core::codes::INIT_FAILED)
            }
            other => panic!("expected remote error, got {other:?}"),
        }
        assert_eq!(
            plugin.metrics().status,
            conveyor_core::PluginStatus::Error
        );
    }

    #[tokio::test]
    async fn execute_miss_enumerates_actions_and_channel_survives() {
        let host = host_for(Arc::new(EchoPlugin::new()));
        let err = host
            .call(
                methods::EXECUTE,
                json!({ "action": "no-such-action", "params": {}, "opts": {} }),
                T,
            )
            .await
            .unwrap_err();
        match err {
            conveyor_rpc::CallError::Remote(rpc) => {
                assert!(rpc.message.contains("unknown action"));
                assert!(rpc.message.contains("echo"));
            }
            other => panic!("expected remote error, got {other:?}"),
        }
        let pong = host.call(methods::PING, Value::Null, T).await.unwrap();
        assert_eq!(pong, json!("pong"));
    }

    #[tokio::test]
    async fn plugin_reads_config_through_the_host_capability() {
        let host = host_for(Arc::new(EchoPlugin::new()));
        let result = host
            .call(
                methods::EXECUTE,
                json!({ "action": "lookup", "params": { "id": "echo" } }),
                T,
            )
            .await
            .unwrap();
        assert_eq!(result, json!(r#"{"shell":"/bin/sh"}"#));
    }
}
