//! Per-project filesystem watchers.
//!
//! Each watched project gets one recursive directory watch (directory
//! watches, not file watches, so atomic editor replaces are caught).
//! Raw events are filtered against the same ignore set as the indexer
//! and forwarded to the debouncer as `(project)` notifications.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use codetect_core::symbols::scan::IGNORED_DIRS;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// Manages the live set of project watchers.
pub struct WatcherSet {
    event_tx: mpsc::Sender<PathBuf>,
    watchers: Mutex<HashMap<PathBuf, RecommendedWatcher>>,
}

impl WatcherSet {
    /// Build an empty set; events surface on `event_tx` as the owning
    /// project's path.
    pub fn new(event_tx: mpsc::Sender<PathBuf>) -> Self {
        Self {
            event_tx,
            watchers: Mutex::new(HashMap::new()),
        }
    }

    /// Start watching a project root. Watching an already-watched
    /// project is a no-op.
    pub fn watch(&self, project: &Path) -> anyhow::Result<()> {
        let mut watchers = self
            .watchers
            .lock()
            .map_err(|_| anyhow::anyhow!("watcher set mutex poisoned"))?;
        if watchers.contains_key(project) {
            return Ok(());
        }

        let project_buf = project.to_path_buf();
        let tx = self.event_tx.clone();
        let root = project_buf.clone();
        let mut watcher =
            notify::recommended_watcher(move |result: Result<Event, notify::Error>| {
                let event = match result {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::warn!(error = %e, "watch error");
                        return;
                    }
                };
                if !is_relevant(&event, &root) {
                    return;
                }
                // The debouncer coalesces per project; the changed
                // path itself is rediscovered by the scan.
                let _ = tx.blocking_send(root.clone());
            })?;
        watcher.watch(project, RecursiveMode::Recursive)?;

        tracing::info!(project = %project.display(), "watching");
        watchers.insert(project_buf, watcher);
        Ok(())
    }

    /// Stop watching a project root.
    pub fn unwatch(&self, project: &Path) {
        if let Ok(mut watchers) = self.watchers.lock() {
            if watchers.remove(project).is_some() {
                tracing::info!(project = %project.display(), "unwatched");
            }
        }
    }

    /// Number of watched projects.
    pub fn len(&self) -> usize {
        self.watchers.lock().map(|w| w.len()).unwrap_or(0)
    }

    /// Whether no project is being watched.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every watcher (shutdown).
    pub fn clear(&self) {
        if let Ok(mut watchers) = self.watchers.lock() {
            watchers.clear();
        }
    }
}

/// Whether an event should reach the debouncer.
fn is_relevant(event: &Event, root: &Path) -> bool {
    if matches!(event.kind, EventKind::Access(_)) {
        return false;
    }
    event.paths.iter().any(|path| !is_ignored_path(path, root))
}

/// True if any component under the project root is ignored or hidden.
fn is_ignored_path(path: &Path, root: &Path) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.components().any(|component| {
        let name = component.as_os_str().to_string_lossy();
        IGNORED_DIRS.contains(&name.as_ref()) || name.starts_with('.')
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ignored_paths() {
        let root = Path::new("/repo");
        assert!(is_ignored_path(Path::new("/repo/.git/HEAD"), root));
        assert!(is_ignored_path(Path::new("/repo/node_modules/x/y.js"), root));
        assert!(is_ignored_path(Path::new("/repo/.codetect/symbols.db"), root));
        assert!(is_ignored_path(Path::new("/repo/target/debug/out.rs"), root));
        assert!(!is_ignored_path(Path::new("/repo/src/main.rs"), root));
    }

    #[tokio::test]
    async fn test_watch_emits_events_for_changes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tx, mut rx) = mpsc::channel(16);
        let set = WatcherSet::new(tx);
        set.watch(dir.path()).expect("watch");
        assert_eq!(set.len(), 1);

        // Give the platform watcher a moment to arm, then touch a file.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        std::fs::write(dir.path().join("main.rs"), "fn main() {}").expect("write");

        let event = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .expect("watcher event within 5s");
        assert_eq!(event, Some(dir.path().to_path_buf()));
    }

    #[tokio::test]
    async fn test_watch_is_idempotent_and_unwatch_removes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tx, _rx) = mpsc::channel(16);
        let set = WatcherSet::new(tx);

        set.watch(dir.path()).expect("watch");
        set.watch(dir.path()).expect("watch again");
        assert_eq!(set.len(), 1);

        set.unwatch(dir.path());
        assert!(set.is_empty());
    }
}
