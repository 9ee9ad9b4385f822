//! Conformance plugin: git repository inspection.
//!
//! Actions:
//! - `status` — `{"path": "/repo"}` → `{"branch", "changes", "clean"}`.
//!   A missing path is the business error `repository path is required`;
//!   git failures surface as business errors with git's stderr attached.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

use conveyor::prelude::*;

struct GitPlugin {
    base: PluginBase,
}

impl GitPlugin {
    fn new() -> Self {
        let base = PluginBase::new();
        base.registry().register(
            ActionInfo::new("status", "working-tree status of a repository"),
            handler(|params, _opts| async move { status(params).await }),
        );
        Self { base }
    }
}

async fn status(params: Value) -> Result<Value, RpcError> {
    let path = params
        .get("path")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if path.is_empty() {
        return Err(RpcError::invalid_params("repository path is required"));
    }

    let output = tokio::process::Command::new("git")
        .args(["-C", path, "status", "--porcelain", "--branch"])
        .output()
        .await
        .map_err(|err| {
            RpcError::new(codes::EXECUTE_FAILED, format!("failed to run git: {err}"))
        })?;

    if !output.status.success() {
        return Err(RpcError::new(
            codes::EXECUTE_FAILED,
            format!(
                "git status failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        ));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut lines = stdout.lines();
    let branch = lines
        .next()
        .and_then(|line| line.strip_prefix("## "))
        .unwrap_or_default()
        .to_string();
    let changes: Vec<String> = lines.map(str::to_string).collect();

    Ok(json!({
        "branch": branch,
        "clean": changes.is_empty(),
        "changes": changes,
    }))
}

#[async_trait::async_trait]
impl PluginHandler for GitPlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo::new("git", env!("CARGO_PKG_VERSION"), PluginType::Source)
            .with_description("inspects git repositories")
            .with_author("Conveyor Contributors")
    }

    fn base(&self) -> &PluginBase {
        &self.base
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

    serve(Arc::new(GitPlugin::new())).await?;
    Ok(())
}
