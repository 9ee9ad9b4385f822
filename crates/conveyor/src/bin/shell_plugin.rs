//! Conformance plugin: runs commands through a configurable interpreter.
//!
//! Config: `{"shell": "/bin/sh"}` (optional; defaults per platform).
//!
//! Actions:
//! - `command` — `{"command": "...", "cwd"?: "...", "env"?: {..}}` →
//!   `{"stdout", "stderr", "exit_code", "success"}`.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

use conveyor::prelude::*;

#[cfg(unix)]
const DEFAULT_SHELL: &str = "/bin/sh";
#[cfg(windows)]
const DEFAULT_SHELL: &str = "cmd";

struct ShellPlugin {
    base: PluginBase,
    shell: Arc<RwLock<String>>,
}

impl ShellPlugin {
    fn new() -> Self {
        let base = PluginBase::new();
        let shell = Arc::new(RwLock::new(DEFAULT_SHELL.to_string()));

        let interpreter = Arc::clone(&shell);
        base.registry().register(
            ActionInfo::new("command", "run a command through the configured interpreter")
                .with_args(json!({
                    "command": "string (required)",
                    "cwd": "string",
                    "env": "object of string"
                })),
            handler(move |params, _opts| {
                let shell = interpreter.read().clone();
                async move { run_command(&shell, params).await }
            }),
        );

        Self { base, shell }
    }
}

async fn run_command(shell: &str, params: Value) -> Result<Value, RpcError> {
    let Some(command) = params.get("command").and_then(Value::as_str) else {
        return Err(RpcError::invalid_params("command is required"));
    };

    let mut cmd = tokio::process::Command::new(shell);
    #[cfg(unix)]
    cmd.arg("-c");
    #[cfg(windows)]
    cmd.arg("/C");
    cmd.arg(command);

    if let Some(cwd) = params.get("cwd").and_then(Value::as_str) {
        cmd.current_dir(cwd);
    }
    if let Some(env) = params.get("env").and_then(Value::as_object) {
        for (key, value) in env {
            if let Some(value) = value.as_str() {
                cmd.env(key, value);
            }
        }
    }

    let output = cmd.output().await.map_err(|err| {
        RpcError::new(
            codes::EXECUTE_FAILED,
            format!("failed to run {shell}: {err}"),
        )
    })?;

    Ok(json!({
        "stdout": String::from_utf8_lossy(&output.stdout),
        "stderr": String::from_utf8_lossy(&output.stderr),
        "exit_code": output.status.code().unwrap_or(-1),
        "success": output.status.success(),
    }))
}

#[async_trait::async_trait]
impl PluginHandler for ShellPlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo::new("shell", env!("CARGO_PKG_VERSION"), PluginType::Build)
            .with_description("executes shell commands")
            .with_author("Conveyor Contributors")
    }

    fn base(&self) -> &PluginBase {
        &self.base
    }

    async fn init(&self, config: Value) -> Result<(), RpcError> {
        match config.get("shell") {
            None | Some(Value::Null) => {}
            Some(Value::String(shell)) => *self.shell.write() = shell.clone(),
            Some(_) => return Err(RpcError::invalid_params("shell must be a string")),
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the RPC channel; logs must go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    serve(Arc::new(ShellPlugin::new())).await?;
    Ok(())
}
