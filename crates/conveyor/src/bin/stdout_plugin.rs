//! Conformance plugin: notification sink.
//!
//! Messages go to a configured file sink, or to the process log stream
//! when no sink is set (stdout itself carries the RPC channel).
//!
//! Config: `{"sink": "/path/to/file", "announce": true}` — both optional.
//! With `announce` set, a line is written to the sink on every init,
//! which makes reloads observable from the outside.
//!
//! Actions:
//! - `send` — `{"message": "..."}`.
//! - `send.template` — `{"template": "hi {{name}}", "vars": {"name": "x"}}`.
//! - `send.batch` — `{"messages": ["...", ...]}`.

use std::io::Write;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

use conveyor::prelude::*;

#[derive(Default, Clone)]
struct Sink {
    path: Option<String>,
}

impl Sink {
    fn deliver(&self, message: &str) -> Result<(), RpcError> {
        match &self.path {
            Some(path) => {
                let mut file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|err| {
                        RpcError::new(codes::EXECUTE_FAILED, format!("sink unavailable: {err}"))
                    })?;
                writeln!(file, "{message}").map_err(|err| {
                    RpcError::new(codes::EXECUTE_FAILED, format!("sink write failed: {err}"))
                })
            }
            None => {
                tracing::info!(target: "notify", "{message}");
                Ok(())
            }
        }
    }
}

struct StdoutPlugin {
    base: PluginBase,
    sink: Arc<RwLock<Sink>>,
}

fn render(template: &str, vars: &Value) -> String {
    let mut rendered = template.to_string();
    if let Some(vars) = vars.as_object() {
        for (key, value) in vars {
            let needle = format!("{{{{{key}}}}}");
            let replacement = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            rendered = rendered.replace(&needle, &replacement);
        }
    }
    rendered
}

impl StdoutPlugin {
    fn new() -> Self {
        let base = PluginBase::new();
        let sink: Arc<RwLock<Sink>> = Arc::new(RwLock::new(Sink::default()));

        let out = Arc::clone(&sink);
        base.registry().register(
            ActionInfo::new("send", "deliver one message"),
            handler(move |params, _opts| {
                let sink = out.read().clone();
                async move {
                    let Some(message) = params.get("message").and_then(Value::as_str) else {
                        return Err(RpcError::invalid_params("message is required"));
                    };
                    sink.deliver(message)?;
                    Ok(json!({ "sent": true, "message": message }))
                }
            }),
        );

        let out = Arc::clone(&sink);
        base.registry().register(
            ActionInfo::new("send.template", "deliver a rendered template"),
            handler(move |params, _opts| {
                let sink = out.read().clone();
                async move {
                    let Some(template) = params.get("template").and_then(Value::as_str) else {
                        return Err(RpcError::invalid_params("template is required"));
                    };
                    let message = render(template, params.get("vars").unwrap_or(&Value::Null));
                    sink.deliver(&message)?;
                    Ok(json!({ "sent": true, "message": message }))
                }
            }),
        );

        let out = Arc::clone(&sink);
        base.registry().register(
            ActionInfo::new("send.batch", "deliver several messages"),
            handler(move |params, _opts| {
                let sink = out.read().clone();
                async move {
                    let Some(messages) = params.get("messages").and_then(Value::as_array) else {
                        return Err(RpcError::invalid_params("messages is required"));
                    };
                    let mut sent = 0u64;
                    for message in messages {
                        if let Some(message) = message.as_str() {
                            sink.deliver(message)?;
                            sent += 1;
                        }
                    }
                    Ok(json!({ "sent": sent }))
                }
            }),
        );

        Self { base, sink }
    }
}

#[async_trait::async_trait]
impl PluginHandler for StdoutPlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo::new("stdout", env!("CARGO_PKG_VERSION"), PluginType::Notify)
            .with_description("writes notifications to a sink")
            .with_author("Conveyor Contributors")
    }

    fn base(&self) -> &PluginBase {
        &self.base
    }

    async fn init(&self, config: Value) -> Result<(), RpcError> {
        let sink = Sink {
            path: config
                .get("sink")
                .and_then(Value::as_str)
                .map(str::to_string),
        };
        if config.get("announce").and_then(Value::as_bool) == Some(true) {
            sink.deliver("stdout plugin initialized")?;
        }
        *self.sink.write() = sink;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    serve(Arc::new(StdoutPlugin::new())).await?;
    Ok(())
}
