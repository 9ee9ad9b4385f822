//! Plugin lifecycle management.
//!
//! [`PluginManager`] is the central owner of every live plugin. It keeps
//! two maps under one read-write lock — `name → PluginClient` and
//! `name → Child` — and guarantees they always carry the same key set:
//! while a client is connected there is exactly one child process behind
//! its name, and a reload is modelled as unregister-then-register, never
//! as in-place replacement.
//!
//! Lock discipline: snapshot under the lock, perform RPC outside it. The
//! register / cleanup / reload paths are the deliberate exception — they
//! are rare, own their slot's child outright, and hold the write lock
//! across their own RPC so no caller can observe a half-registered or
//! mid-reload plugin.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future;
use tokio::process::Child;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use conveyor_core::{PluginMetrics, RuntimePluginConfig};
use conveyor_rpc::{CallError, ServiceHandler};

use crate::accessor::{ConfigSource, HostCapability};
use crate::builtin::builtin_plugins;
use crate::client::{PluginClient, spawn_plugin};
use crate::error::{HostError, HostResult};

// =============================================================================
// ManagerConfig
// =============================================================================

/// Tunables for a [`PluginManager`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Flat directory of plugin executables (nested directories are
    /// scanned; their files are treated as independent plugins).
    pub plugin_dir: PathBuf,
    /// Deadline for every RPC to a plugin.
    pub rpc_timeout: Duration,
    /// Deadline for the greeting after spawn.
    pub handshake_timeout: Duration,
    /// Pause between unregister and register inside a reload, giving the
    /// filesystem a beat to settle. Empirically chosen, not a contract.
    pub reload_grace: Duration,
    /// Overall deadline for [`PluginManager::close`].
    pub shutdown_timeout: Duration,
}

impl ManagerConfig {
    pub fn new(plugin_dir: impl Into<PathBuf>) -> Self {
        Self {
            plugin_dir: plugin_dir.into(),
            rpc_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(10),
            reload_grace: Duration::from_millis(100),
            shutdown_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_reload_grace(mut self, grace: Duration) -> Self {
        self.reload_grace = grace;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Extensions that are never plugin executables.
const EXCLUDED_EXTENSIONS: &[&str] = &["json", "md", "txt", "zip", "log"];

/// Directory-scan eligibility: no dotfiles, no documentation extensions.
fn eligible_plugin_file(path: &Path) -> bool {
    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if file_name.starts_with('.') {
        return false;
    }
    if let Some(ext) = path.extension().and_then(|e| e.to_str())
        && EXCLUDED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
    {
        return false;
    }
    true
}

/// Derives the plugin name from a file name, by convention
/// `<name>_<version>`: everything before the first underscore.
pub(crate) fn plugin_name_from_path(path: &Path) -> Option<String> {
    let file_name = path.file_name()?.to_str()?;
    let name = file_name.split('_').next().unwrap_or(file_name);
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

// =============================================================================
// PluginManager
// =============================================================================

struct Slots {
    clients: HashMap<String, Arc<PluginClient>>,
    processes: HashMap<String, Child>,
}

struct Heartbeat {
    task: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Central coordinator for out-of-process plugins.
pub struct PluginManager {
    config: ManagerConfig,
    slots: RwLock<Slots>,
    capability: Arc<dyn ServiceHandler>,
    heartbeat: parking_lot::Mutex<Option<Heartbeat>>,
}

impl PluginManager {
    /// Creates a manager serving the config capability from `source`.
    pub fn new(config: ManagerConfig, source: Arc<dyn ConfigSource>) -> Self {
        Self {
            config,
            slots: RwLock::new(Slots {
                clients: HashMap::new(),
                processes: HashMap::new(),
            }),
            capability: Arc::new(HostCapability::new(source)),
            heartbeat: parking_lot::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    // ─── Register / unregister ───────────────────────────────────────────

    /// Spawns, handshakes, identifies, and initialises the plugin at
    /// `path`, then stores it under `name`.
    ///
    /// A duplicate name fails fast. Any failure later in the pipeline
    /// kills the child and surfaces a named error; nothing is stored.
    pub async fn register_plugin(
        &self,
        name: &str,
        path: &Path,
        config: RuntimePluginConfig,
    ) -> HostResult<()> {
        let mut slots = self.slots.write().await;
        self.register_locked(&mut slots, name, path, config).await
    }

    async fn register_locked(
        &self,
        slots: &mut Slots,
        name: &str,
        path: &Path,
        config: RuntimePluginConfig,
    ) -> HostResult<()> {
        if slots.clients.contains_key(name) {
            return Err(HostError::DuplicateName(name.to_string()));
        }

        let init_blob = config.config.clone();
        let (client, mut child) = spawn_plugin(
            name,
            path,
            config,
            self.config.handshake_timeout,
            self.config.rpc_timeout,
            Arc::clone(&self.capability),
        )
        .await?;

        // Identity comes from the plugin itself; the config fallback
        // already sits in the client if this fails.
        match client.get_info().await {
            Ok(plugin_info) => {
                if !plugin_info.plugin_type.is_specified() {
                    warn!(plugin = %name, "plugin declares no type");
                }
            }
            Err(err) => {
                warn!(plugin = %name, error = %err, "get_info failed, using config identity");
            }
        }

        if let Err(err) = client.init(&init_blob).await {
            client.close();
            let _ = child.kill().await;
            return Err(match err {
                CallError::Remote(source) => HostError::Init {
                    name: name.to_string(),
                    source,
                },
                CallError::Channel(source) => HostError::Channel {
                    name: name.to_string(),
                    source,
                },
            });
        }

        info!(plugin = %name, path = %path.display(), "plugin registered");
        slots.processes.insert(name.to_string(), child);
        slots.clients.insert(name.to_string(), Arc::new(client));
        Ok(())
    }

    /// Best-effort `cleanup`, then kills the child and removes both slots.
    pub async fn unregister_plugin(&self, name: &str) -> HostResult<()> {
        let mut slots = self.slots.write().await;
        self.unregister_locked(&mut slots, name).await
    }

    async fn unregister_locked(&self, slots: &mut Slots, name: &str) -> HostResult<()> {
        let client = slots
            .clients
            .remove(name)
            .ok_or_else(|| HostError::NotFound(name.to_string()))?;
        let child = slots.processes.remove(name);

        if client.is_connected()
            && let Err(err) = client.cleanup().await
        {
            debug!(plugin = %name, error = %err, "cleanup failed, killing anyway");
        }
        client.close();
        if let Some(mut child) = child {
            let _ = child.kill().await;
        }
        info!(plugin = %name, "plugin unregistered");
        Ok(())
    }

    // ─── Reload ──────────────────────────────────────────────────────────

    /// Unregister, grace wait, register with the recorded `{path, config}`
    /// snapshot — all under the write lock, so no caller ever observes the
    /// name missing mid-reload.
    ///
    /// If the file vanished during the grace period, the load step is
    /// abandoned and the slot stays empty.
    pub async fn reload_plugin(&self, name: &str) -> HostResult<()> {
        let mut slots = self.slots.write().await;
        let (path, config) = {
            let client = slots
                .clients
                .get(name)
                .ok_or_else(|| HostError::NotFound(name.to_string()))?;
            (client.plugin_path().to_path_buf(), client.config().clone())
        };

        self.unregister_locked(&mut slots, name).await?;
        tokio::time::sleep(self.config.reload_grace).await;

        if !path.exists() {
            warn!(plugin = %name, path = %path.display(), "file gone, abandoning reload");
            return Err(HostError::SourceVanished(path));
        }
        self.register_locked(&mut slots, name, &path, config).await
    }

    /// Best-effort reload of every plugin; failures are aggregated, never
    /// short-circuited.
    pub async fn reload_all_plugins(&self) -> HostResult<()> {
        let mut names: Vec<String> = {
            let slots = self.slots.read().await;
            slots.clients.keys().cloned().collect()
        };
        names.sort();

        let mut failures = Vec::new();
        for name in names {
            if let Err(err) = self.reload_plugin(&name).await {
                failures.push((name, err.to_string()));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(HostError::ReloadAll(failures))
        }
    }

    // ─── Read-only accessors ─────────────────────────────────────────────

    pub async fn get_plugin(&self, name: &str) -> Option<Arc<PluginClient>> {
        self.slots.read().await.clients.get(name).cloned()
    }

    /// Sorted snapshot of the registered plugin names.
    pub async fn list_plugins(&self) -> Vec<String> {
        let mut names: Vec<String> = self.slots.read().await.clients.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn plugin_count(&self) -> usize {
        self.slots.read().await.clients.len()
    }

    /// Point-in-time counters. The client and process counts are equal
    /// whenever the manager is at rest; a difference means a registration
    /// pipeline is mid-flight.
    pub async fn stats(&self) -> ManagerStats {
        let slots = self.slots.read().await;
        ManagerStats {
            plugins: slots.clients.len(),
            processes: slots.processes.len(),
            connected: slots
                .clients
                .values()
                .filter(|client| client.is_connected())
                .count(),
        }
    }

    /// Inverse lookup by executable path, used by the watcher.
    pub async fn find_plugin_by_path(&self, path: &Path) -> Option<Arc<PluginClient>> {
        self.slots
            .read()
            .await
            .clients
            .values()
            .find(|client| client.plugin_path() == path)
            .cloned()
    }

    // ─── Metrics & health ────────────────────────────────────────────────

    /// Metrics for one plugin. A failing call yields a synthetic
    /// `status: error` record rather than an error — only an unknown name
    /// is a failure.
    pub async fn get_plugin_metrics(&self, name: &str) -> HostResult<PluginMetrics> {
        let client = self
            .get_plugin(name)
            .await
            .ok_or_else(|| HostError::NotFound(name.to_string()))?;
        Ok(Self::metrics_for(&client).await)
    }

    /// Metrics for every plugin. Every known name gets a slot in the
    /// result; failures are substituted, never dropped.
    pub async fn get_all_plugin_metrics(&self) -> HashMap<String, PluginMetrics> {
        let clients: Vec<Arc<PluginClient>> = {
            let slots = self.slots.read().await;
            slots.clients.values().cloned().collect()
        };
        let snapshots = future::join_all(clients.iter().map(|client| async {
            (client.name().to_string(), Self::metrics_for(client).await)
        }))
        .await;
        snapshots.into_iter().collect()
    }

    async fn metrics_for(client: &Arc<PluginClient>) -> PluginMetrics {
        let info = client.info();
        if !client.is_connected() {
            return PluginMetrics::error_record(
                client.name(),
                info.plugin_type,
                info.version,
                "plugin disconnected",
            );
        }
        match client.get_metrics().await {
            Ok(metrics) => metrics,
            Err(err) => PluginMetrics::error_record(
                client.name(),
                info.plugin_type,
                info.version,
                err.to_string(),
            ),
        }
    }

    /// One ping round over every plugin: `name → alive`.
    pub async fn health_check(&self) -> HashMap<String, bool> {
        let clients: Vec<Arc<PluginClient>> = {
            let slots = self.slots.read().await;
            slots.clients.values().cloned().collect()
        };
        let results = future::join_all(clients.iter().map(|client| async {
            (client.name().to_string(), client.ping().await.is_ok())
        }))
        .await;
        results.into_iter().collect()
    }

    /// Launches the background liveness loop. Unhealthy plugins are
    /// logged; automatic restart stays a future hook.
    pub fn start_heartbeat(self: Arc<Self>, interval: Duration) {
        let mut guard = self.heartbeat.lock();
        if guard.is_some() {
            warn!("heartbeat already running");
            return;
        }
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let manager = Arc::clone(&self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        for (name, healthy) in manager.health_check().await {
                            if !healthy {
                                warn!(plugin = %name, "plugin failed health check");
                            }
                        }
                    }
                }
            }
        });
        *guard = Some(Heartbeat { task, cancel });
    }

    /// Stops the liveness loop if it is running.
    pub fn stop_heartbeat(&self) {
        if let Some(heartbeat) = self.heartbeat.lock().take() {
            heartbeat.cancel.cancel();
            heartbeat.task.abort();
        }
    }

    // ─── Directory load ──────────────────────────────────────────────────

    /// Registers builtin-registry entries, then scans the configured
    /// directory. Per-file failures are logged and skipped; the scan
    /// continues. Returns the names that registered successfully.
    pub async fn load_plugins_from_dir(&self) -> HostResult<Vec<String>> {
        let mut loaded = Vec::new();

        for builtin in builtin_plugins() {
            match self
                .register_plugin(&builtin.name, &builtin.path, builtin.config)
                .await
            {
                Ok(()) => loaded.push(builtin.name),
                Err(err) => {
                    warn!(plugin = %builtin.name, error = %err, "skipping builtin plugin")
                }
            }
        }

        let dir = &self.config.plugin_dir;
        if !dir.is_dir() {
            return Err(HostError::PluginDir(dir.clone()));
        }

        for entry in walkdir::WalkDir::new(dir).min_depth(1).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(error = %err, "unreadable directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if !eligible_plugin_file(path) {
                debug!(path = %path.display(), "ignoring non-plugin file");
                continue;
            }
            let Some(name) = plugin_name_from_path(path) else {
                continue;
            };
            let config = RuntimePluginConfig::new(&name);
            match self.register_plugin(&name, path, config).await {
                Ok(()) => loaded.push(name),
                Err(err) => {
                    warn!(plugin = %name, path = %path.display(), error = %err, "skipping plugin")
                }
            }
        }

        info!(count = loaded.len(), dir = %dir.display(), "plugin directory loaded");
        Ok(loaded)
    }

    // ─── Shutdown ────────────────────────────────────────────────────────

    /// Sequential cleanup + kill for every plugin under the shutdown
    /// deadline, then both maps are cleared. Stops the heartbeat first.
    pub async fn close(&self) {
        self.stop_heartbeat();

        let mut slots = self.slots.write().await;
        let deadline = Instant::now() + self.config.shutdown_timeout;
        let mut names: Vec<String> = slots.clients.keys().cloned().collect();
        names.sort();

        for name in names {
            if let Some(client) = slots.clients.remove(&name) {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if client.is_connected() && !remaining.is_zero() {
                    if tokio::time::timeout(remaining, client.cleanup())
                        .await
                        .is_err()
                    {
                        warn!(plugin = %name, "cleanup missed the shutdown deadline");
                    }
                }
                client.close();
            }
            if let Some(mut child) = slots.processes.remove(&name) {
                let _ = child.kill().await;
            }
            debug!(plugin = %name, "plugin shut down");
        }
        info!("plugin manager closed");
    }
}

/// Snapshot of the manager's slot maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerStats {
    /// Registered plugin clients.
    pub plugins: usize,
    /// Owned child processes.
    pub processes: usize,
    /// Clients whose channel is still usable.
    pub connected: usize,
}

impl std::fmt::Display for ManagerStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} plugin(s), {} process(es), {} connected",
            self.plugins, self.processes, self.connected
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_derivation_splits_on_first_underscore() {
        assert_eq!(
            plugin_name_from_path(Path::new("/plugins/shell_1.0.0")).as_deref(),
            Some("shell")
        );
        assert_eq!(
            plugin_name_from_path(Path::new("/plugins/git_2.1_beta")).as_deref(),
            Some("git")
        );
        assert_eq!(
            plugin_name_from_path(Path::new("/plugins/stdout")).as_deref(),
            Some("stdout")
        );
    }

    #[test]
    fn scan_eligibility_filters_docs_and_dotfiles() {
        assert!(eligible_plugin_file(Path::new("/p/shell_1.0.0")));
        assert!(!eligible_plugin_file(Path::new("/p/.hidden")));
        assert!(!eligible_plugin_file(Path::new("/p/readme.md")));
        assert!(!eligible_plugin_file(Path::new("/p/manifest.JSON")));
        assert!(!eligible_plugin_file(Path::new("/p/build.log")));
        assert!(!eligible_plugin_file(Path::new("/p/archive.zip")));
        assert!(!eligible_plugin_file(Path::new("/p/notes.txt")));
    }

    #[tokio::test]
    async fn unknown_names_fail_with_not_found() {
        let manager = PluginManager::new(
            ManagerConfig::new("/nonexistent"),
            Arc::new(crate::accessor::MemoryConfigStore::new()),
        );
        assert!(matches!(
            manager.unregister_plugin("ghost").await,
            Err(HostError::NotFound(_))
        ));
        assert!(matches!(
            manager.reload_plugin("ghost").await,
            Err(HostError::NotFound(_))
        ));
        assert!(manager.get_plugin("ghost").await.is_none());
        assert!(manager.list_plugins().await.is_empty());
    }

    #[tokio::test]
    async fn load_from_missing_dir_is_a_config_error() {
        let manager = PluginManager::new(
            ManagerConfig::new("/definitely/not/a/dir"),
            Arc::new(crate::accessor::MemoryConfigStore::new()),
        );
        assert!(matches!(
            manager.load_plugins_from_dir().await,
            Err(HostError::PluginDir(_))
        ));
    }

    #[tokio::test]
    async fn spawn_failure_is_named_and_keeps_maps_empty() {
        let manager = PluginManager::new(
            ManagerConfig::new("/tmp"),
            Arc::new(crate::accessor::MemoryConfigStore::new()),
        );
        let err = manager
            .register_plugin(
                "ghost",
                Path::new("/no/such/executable"),
                RuntimePluginConfig::new("ghost"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::Spawn { .. }));
        assert!(err.to_string().contains("ghost"));
        assert_eq!(manager.plugin_count().await, 0);
    }
}
