//! Shared daemon state.
//!
//! One instance wires the watcher, debouncer, workers, and control
//! plane together. The coalescing sets guarantee at most one queue
//! entry per project and that no project is ever indexed by two
//! workers at once.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use codetect_core::registry::Registry;
use codetect_core::Engine;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Bound on the reindex work queue.
pub const WORK_QUEUE_CAPACITY: usize = 64;

/// Shared state behind the daemon's activities.
pub struct DaemonState {
    /// Host-wide project registry.
    pub registry: Registry,
    /// Sender side of the bounded work queue.
    pub queue_tx: mpsc::Sender<PathBuf>,
    /// Projects currently queued or being indexed.
    pending: Mutex<HashSet<PathBuf>>,
    /// Projects that received events while pending; re-queued when
    /// their in-flight pass finishes so the last event still wins.
    dirty: Mutex<HashSet<PathBuf>>,
    /// Engines by project, created lazily and kept hot.
    engines: tokio::sync::Mutex<HashMap<PathBuf, Arc<Engine>>>,
    /// Shutdown signal shared by every loop.
    pub cancel: CancellationToken,
}

impl DaemonState {
    /// Build state around the given registry and queue sender.
    pub fn new(registry: Registry, queue_tx: mpsc::Sender<PathBuf>) -> Self {
        Self {
            registry,
            queue_tx,
            pending: Mutex::new(HashSet::new()),
            dirty: Mutex::new(HashSet::new()),
            engines: tokio::sync::Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Enqueue a project for indexing, coalescing duplicates.
    ///
    /// Returns true if the project was placed on the queue; false if
    /// it was already pending (the event is remembered in the dirty
    /// set instead).
    pub async fn enqueue(&self, project: &Path) -> bool {
        let newly_pending = self
            .pending
            .lock()
            .map(|mut set| set.insert(project.to_path_buf()))
            .unwrap_or(false);
        if !newly_pending {
            if let Ok(mut dirty) = self.dirty.lock() {
                dirty.insert(project.to_path_buf());
            }
            return false;
        }
        if self.queue_tx.send(project.to_path_buf()).await.is_err() {
            if let Ok(mut set) = self.pending.lock() {
                set.remove(project);
            }
            return false;
        }
        true
    }

    /// Mark a project's index pass finished. Returns true if events
    /// arrived during the pass and the project should be re-queued.
    pub fn finish(&self, project: &Path) -> bool {
        if let Ok(mut set) = self.pending.lock() {
            set.remove(project);
        }
        self.dirty
            .lock()
            .map(|mut dirty| dirty.remove(project))
            .unwrap_or(false)
    }

    /// Number of projects currently pending.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().map(|set| set.len()).unwrap_or(0)
    }

    /// Get or create the engine for a project.
    pub async fn engine_for(&self, project: &Path) -> anyhow::Result<Arc<Engine>> {
        let mut engines = self.engines.lock().await;
        if let Some(engine) = engines.get(project) {
            return Ok(engine.clone());
        }
        let engine = Arc::new(Engine::new(project).await?);
        engines.insert(project.to_path_buf(), engine.clone());
        Ok(engine)
    }

    /// Drop the cached engine for a removed project.
    pub async fn evict_engine(&self, project: &Path) {
        self.engines.lock().await.remove(project);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_queue(
        capacity: usize,
    ) -> (Arc<DaemonState>, mpsc::Receiver<PathBuf>, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = Registry::new(dir.path().join("registry.json"));
        let (tx, rx) = mpsc::channel(capacity);
        (Arc::new(DaemonState::new(registry, tx)), rx, dir)
    }

    #[tokio::test]
    async fn test_enqueue_coalesces_duplicates() {
        let (state, mut rx, _dir) = state_with_queue(8);
        let project = PathBuf::from("/tmp/p1");

        assert!(state.enqueue(&project).await);
        assert!(!state.enqueue(&project).await, "second enqueue coalesces");
        assert!(!state.enqueue(&project).await);
        assert_eq!(state.pending_count(), 1);

        // Exactly one entry landed on the queue.
        assert_eq!(rx.recv().await, Some(project.clone()));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_finish_reports_dirty_projects() {
        let (state, mut rx, _dir) = state_with_queue(8);
        let project = PathBuf::from("/tmp/p1");

        state.enqueue(&project).await;
        let _ = rx.recv().await;

        // An event fires while the pass is in flight.
        state.enqueue(&project).await;
        assert!(state.finish(&project), "dirty project wants a re-queue");
        assert!(!state.finish(&project), "dirty flag consumed");
    }

    #[tokio::test]
    async fn test_distinct_projects_queue_independently() {
        let (state, mut rx, _dir) = state_with_queue(8);
        assert!(state.enqueue(Path::new("/tmp/a")).await);
        assert!(state.enqueue(Path::new("/tmp/b")).await);
        assert_eq!(state.pending_count(), 2);
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
    }
}
