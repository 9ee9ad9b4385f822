//! Filesystem watcher driving hot load / unload / reload.
//!
//! Raw `notify` events are noisy: editors write through temp files,
//! copies fire create+write bursts, and the manager itself touches files
//! it just loaded. The watcher tames them in three stages:
//!
//! 1. **Filter** — temp/doc files and metadata-only (chmod) events are
//!    dropped; a rename or remove of a path that no longer exists is a
//!    delete, anything else counts as a modification.
//! 2. **Suppress** — events within 2 s of that path's last successful
//!    load are dropped, which breaks the self-triggering loop.
//! 3. **Debounce** — surviving events collapse into a per-path pending
//!    op; a 100 ms ticker executes ops whose last event is older than the
//!    500 ms window.
//!
//! Executing an op: file gone → unregister; file present and known →
//! reload (the manager applies the grace period and re-applies the
//! recorded config); file present and unknown → fresh register with the
//! default config. Events against one path are serialised by the pending
//! map; different paths are independent.
//!
//! The watcher's state lives under its own lock and is never held while
//! calling into the manager.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::event::{EventKind, ModifyKind};
use notify::{RecommendedWatcher, RecursiveMode, Watcher as _};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use conveyor_core::RuntimePluginConfig;

use crate::error::{HostError, HostResult};
use crate::manager::{PluginManager, plugin_name_from_path};

// =============================================================================
// Config & state
// =============================================================================

/// Tunables for a [`PluginWatcher`].
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Quiet time a path must see before its pending op executes.
    pub debounce: Duration,
    /// Poll cadence of the debounce loop.
    pub tick: Duration,
    /// Window after a successful load during which events for that path
    /// are dropped.
    pub recent_load_window: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            tick: Duration::from_millis(100),
            recent_load_window: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingOp {
    Modify,
    Remove,
}

struct PendingEntry {
    op: PendingOp,
    last_event: Instant,
}

struct FileState {
    last_event: Instant,
    last_op: PendingOp,
    load_time: Option<Instant>,
}

#[derive(Default)]
struct WatchState {
    pending: HashMap<PathBuf, PendingEntry>,
    files: HashMap<PathBuf, FileState>,
}

// =============================================================================
// Event classification
// =============================================================================

/// Suffixes of files that are never plugins (editor droppings and docs).
const IGNORED_EXTENSIONS: &[&str] = &["tmp", "swp", "json", "md", "txt", "zip", "log"];

fn should_ignore(path: &Path) -> bool {
    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
        return true;
    };
    if file_name.starts_with('.') || file_name.ends_with('~') {
        return true;
    }
    if let Some(ext) = path.extension().and_then(|e| e.to_str())
        && IGNORED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
    {
        return true;
    }
    false
}

/// Whether this event kind can change plugin code. Metadata-only events
/// (chmod) and reads are dropped outright.
fn relevant_kind(kind: &EventKind) -> bool {
    match kind {
        EventKind::Create(_) | EventKind::Remove(_) => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        EventKind::Access(_) => false,
        EventKind::Any => true,
        EventKind::Other => false,
    }
}

// =============================================================================
// PluginWatcher
// =============================================================================

/// Watches one or more directories and turns settled filesystem events
/// into manager operations.
pub struct PluginWatcher {
    manager: Arc<PluginManager>,
    config: WatcherConfig,
    state: Arc<Mutex<WatchState>>,
    cancel: CancellationToken,
    fs_watcher: Option<RecommendedWatcher>,
    tasks: Vec<JoinHandle<()>>,
}

impl PluginWatcher {
    pub fn new(manager: Arc<PluginManager>, config: WatcherConfig) -> Self {
        Self {
            manager,
            config,
            state: Arc::new(Mutex::new(WatchState::default())),
            cancel: CancellationToken::new(),
            fs_watcher: None,
            tasks: Vec::new(),
        }
    }

    /// Subscribes to `dirs` (recursively) and starts the event and
    /// debounce loops.
    pub fn start(&mut self, dirs: &[PathBuf]) -> HostResult<()> {
        if self.fs_watcher.is_some() {
            return Err(HostError::Watch("watcher already started".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut fs_watcher =
            notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
                // Dropped receiver just means we are shutting down.
                let _ = tx.send(event);
            })?;
        for dir in dirs {
            fs_watcher.watch(dir, RecursiveMode::Recursive)?;
            info!(dir = %dir.display(), "watching plugin directory");
        }
        self.fs_watcher = Some(fs_watcher);

        self.tasks.push(tokio::spawn(event_loop(
            rx,
            Arc::clone(&self.state),
            self.config.clone(),
            self.cancel.clone(),
        )));
        self.tasks.push(tokio::spawn(debounce_loop(
            Arc::clone(&self.manager),
            Arc::clone(&self.state),
            self.config.clone(),
            self.cancel.clone(),
        )));
        Ok(())
    }

    /// Cancels both loops, closes the fs handle, and waits for the tasks
    /// to exit.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        self.fs_watcher = None;
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        info!("plugin watcher stopped");
    }
}

// =============================================================================
// Event loop
// =============================================================================

async fn event_loop(
    mut rx: mpsc::UnboundedReceiver<notify::Result<notify::Event>>,
    state: Arc<Mutex<WatchState>>,
    config: WatcherConfig,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = rx.recv() => match event {
                // Handle closed underneath us: fatal, the loop ends.
                None => {
                    debug!("watch handle closed");
                    break;
                }
                Some(Err(err)) => warn!(error = %err, "filesystem watch error"),
                Some(Ok(event)) => record_event(&state, &config, event),
            }
        }
    }
}

fn record_event(state: &Mutex<WatchState>, config: &WatcherConfig, event: notify::Event) {
    if !relevant_kind(&event.kind) {
        return;
    }
    let now = Instant::now();
    for path in event.paths {
        if should_ignore(&path) {
            continue;
        }
        // A rename that left no file behind is a delete; anything else
        // means the file is (still) there.
        let op = if path.exists() {
            PendingOp::Modify
        } else {
            PendingOp::Remove
        };

        let mut guard = state.lock();
        if op == PendingOp::Modify
            && let Some(file) = guard.files.get(&path)
            && let Some(load_time) = file.load_time
            && now.duration_since(load_time) < config.recent_load_window
        {
            trace!(path = %path.display(), "suppressing event right after load");
            continue;
        }

        guard
            .files
            .entry(path.clone())
            .and_modify(|file| {
                file.last_event = now;
                file.last_op = op;
            })
            .or_insert(FileState {
                last_event: now,
                last_op: op,
                load_time: None,
            });
        // Collapse into the single pending op for this path.
        guard.pending.insert(
            path,
            PendingEntry {
                op,
                last_event: now,
            },
        );
    }
}

// =============================================================================
// Debounce loop
// =============================================================================

async fn debounce_loop(
    manager: Arc<PluginManager>,
    state: Arc<Mutex<WatchState>>,
    config: WatcherConfig,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.tick);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                for (path, op) in take_settled(&state, config.debounce) {
                    execute_op(&manager, &state, path, op).await;
                }
            }
        }
    }
}

/// Pops every pending op whose last event is older than the debounce
/// window.
fn take_settled(state: &Mutex<WatchState>, debounce: Duration) -> Vec<(PathBuf, PendingOp)> {
    let now = Instant::now();
    let mut guard = state.lock();
    let due: Vec<PathBuf> = guard
        .pending
        .iter()
        .filter(|(_, entry)| now.duration_since(entry.last_event) >= debounce)
        .map(|(path, _)| path.clone())
        .collect();
    due.into_iter()
        .filter_map(|path| {
            guard
                .pending
                .remove(&path)
                .map(|entry| (path, entry.op))
        })
        .collect()
}

async fn execute_op(
    manager: &Arc<PluginManager>,
    state: &Mutex<WatchState>,
    path: PathBuf,
    op: PendingOp,
) {
    // The file may have changed state again while the op sat in the map.
    let op = if path.exists() { op } else { PendingOp::Remove };
    match op {
        PendingOp::Remove => {
            if let Some(name) = known_plugin_name(manager, &path).await {
                match manager.unregister_plugin(&name).await {
                    Ok(()) => info!(plugin = %name, path = %path.display(), "unloaded removed plugin"),
                    Err(err) => warn!(plugin = %name, error = %err, "unload failed"),
                }
            }
            if let Some(file) = state.lock().files.remove(&path) {
                debug!(path = %path.display(), last_op = ?file.last_op, "forgot file state");
            }
        }
        PendingOp::Modify => {
            let result = match known_plugin_name(manager, &path).await {
                Some(name) => (name.clone(), manager.reload_plugin(&name).await),
                None => match plugin_name_from_path(&path) {
                    Some(name) => {
                        let config = RuntimePluginConfig::new(&name);
                        (name.clone(), manager.register_plugin(&name, &path, config).await)
                    }
                    None => return,
                },
            };
            match result {
                (name, Ok(())) => {
                    let mut guard = state.lock();
                    let now = Instant::now();
                    guard
                        .files
                        .entry(path.clone())
                        .and_modify(|file| file.load_time = Some(now))
                        .or_insert(FileState {
                            last_event: now,
                            last_op: PendingOp::Modify,
                            load_time: Some(now),
                        });
                    info!(plugin = %name, path = %path.display(), "plugin (re)loaded");
                }
                (name, Err(err)) => {
                    warn!(plugin = %name, path = %path.display(), error = %err, "(re)load failed")
                }
            }
        }
    }
}

/// Resolves the plugin name for a path against the live manager state:
/// exact path match first, then substring match on the base file name.
/// Returns `None` when the manager does not know this plugin.
async fn known_plugin_name(manager: &Arc<PluginManager>, path: &Path) -> Option<String> {
    if let Some(client) = manager.find_plugin_by_path(path).await {
        return Some(client.name().to_string());
    }
    let base = path.file_name()?.to_str()?;
    manager
        .list_plugins()
        .await
        .into_iter()
        .find(|name| base.contains(name.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind};

    #[test]
    fn temp_and_doc_files_are_ignored() {
        assert!(should_ignore(Path::new("/p/.git")));
        assert!(should_ignore(Path::new("/p/shell_1.0.0~")));
        assert!(should_ignore(Path::new("/p/shell.tmp")));
        assert!(should_ignore(Path::new("/p/.shell_1.0.0.swp")));
        assert!(should_ignore(Path::new("/p/readme.md")));
        assert!(should_ignore(Path::new("/p/plugins.json")));
        assert!(!should_ignore(Path::new("/p/shell_1.0.0")));
    }

    #[test]
    fn chmod_events_are_dropped() {
        assert!(!relevant_kind(&EventKind::Modify(ModifyKind::Metadata(
            MetadataKind::Permissions
        ))));
        assert!(!relevant_kind(&EventKind::Access(
            notify::event::AccessKind::Read
        )));
        assert!(relevant_kind(&EventKind::Create(CreateKind::File)));
        assert!(relevant_kind(&EventKind::Modify(ModifyKind::Data(
            DataChange::Content
        ))));
        assert!(relevant_kind(&EventKind::Remove(RemoveKind::File)));
    }

    #[test]
    fn bursts_collapse_to_one_pending_op() {
        let state = Mutex::new(WatchState::default());
        let config = WatcherConfig::default();
        let path = std::env::temp_dir().join("conveyor-collapse-test");
        std::fs::write(&path, b"x").unwrap();

        for _ in 0..5 {
            record_event(
                &state,
                &config,
                notify::Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
                    .add_path(path.clone()),
            );
        }
        assert_eq!(state.lock().pending.len(), 1);

        // Nothing settles before the debounce window has passed.
        assert!(take_settled(&state, config.debounce).is_empty());
        // Everything settles once it has.
        assert_eq!(take_settled(&state, Duration::ZERO).len(), 1);
        assert!(state.lock().pending.is_empty());

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn events_right_after_a_load_are_suppressed() {
        let state = Mutex::new(WatchState::default());
        let config = WatcherConfig::default();
        let path = std::env::temp_dir().join("conveyor-suppress-test");
        std::fs::write(&path, b"x").unwrap();

        state.lock().files.insert(
            path.clone(),
            FileState {
                last_event: Instant::now(),
                last_op: PendingOp::Modify,
                load_time: Some(Instant::now()),
            },
        );
        record_event(
            &state,
            &config,
            notify::Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
                .add_path(path.clone()),
        );
        assert!(state.lock().pending.is_empty());

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn vanished_paths_become_removes() {
        let state = Mutex::new(WatchState::default());
        let config = WatcherConfig::default();
        let path = PathBuf::from("/definitely/gone/shell_1.0.0");

        record_event(
            &state,
            &config,
            notify::Event::new(EventKind::Modify(ModifyKind::Name(
                notify::event::RenameMode::From,
            )))
            .add_path(path.clone()),
        );
        let guard = state.lock();
        assert_eq!(guard.pending[&path].op, PendingOp::Remove);
    }
}
