//! Shared helpers for the end-to-end suite.
//!
//! The suite drives the real conformance plugin executables built from
//! this crate's `src/bin/`, staged into temp directories under the
//! `<name>_<version>` convention.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use conveyor::prelude::*;

pub const SHELL_BIN: &str = env!("CARGO_BIN_EXE_shell_plugin");
pub const STDOUT_BIN: &str = env!("CARGO_BIN_EXE_stdout_plugin");
pub const GIT_BIN: &str = env!("CARGO_BIN_EXE_git_plugin");

/// Copies a built plugin binary into `dir` under `file_name`.
///
/// Write-then-rename: overwriting a running executable in place fails
/// with ETXTBSY on Linux. The temp name is dot-prefixed so neither the
/// directory scan nor the watcher picks it up.
pub fn stage(dir: &Path, bin: &str, file_name: &str) -> PathBuf {
    let dest = dir.join(file_name);
    let staging = dir.join(format!(".{file_name}.stage.tmp"));
    std::fs::copy(bin, &staging).expect("stage plugin binary");
    std::fs::rename(&staging, &dest).expect("activate staged binary");
    dest
}

/// Writes an executable script into `dir` (for non-plugin binaries).
#[cfg(unix)]
pub fn stage_script(dir: &Path, file_name: &str, content: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let dest = dir.join(file_name);
    std::fs::write(&dest, content).expect("write script");
    let mut perms = std::fs::metadata(&dest).expect("script metadata").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&dest, perms).expect("chmod script");
    dest
}

/// A manager with test-friendly timeouts over an in-memory config store.
pub fn manager_for(dir: &Path) -> Arc<PluginManager> {
    Arc::new(PluginManager::new(
        ManagerConfig::new(dir)
            .with_rpc_timeout(Duration::from_secs(5))
            .with_handshake_timeout(Duration::from_secs(5)),
        Arc::new(MemoryConfigStore::new()),
    ))
}

/// Polls `cond` every 50 ms until it holds or `deadline` passes.
pub async fn wait_for<F, Fut>(deadline: Duration, mut cond: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = Instant::now();
    loop {
        if cond().await {
            return true;
        }
        if start.elapsed() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
