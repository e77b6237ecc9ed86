//! Worker pool draining the reindex queue.
//!
//! A fixed pool of workers pulls project paths off the bounded queue
//! and runs one full engine pass per entry (symbols, then the
//! embedding pipeline). Worker failure is logged, never fatal; the
//! project becomes eligible again on its next event.

use std::path::PathBuf;
use std::sync::Arc;

use codetect_core::registry::ProjectStats;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::state::DaemonState;

/// Number of workers in the pool; different projects index in
/// parallel up to this bound.
pub const POOL_SIZE: usize = 2;

/// Spawn the pool; handles resolve when the queue closes or the
/// daemon is cancelled.
pub fn spawn(
    state: Arc<DaemonState>,
    queue_rx: mpsc::Receiver<PathBuf>,
) -> Vec<JoinHandle<()>> {
    let queue_rx = Arc::new(tokio::sync::Mutex::new(queue_rx));
    (0..POOL_SIZE)
        .map(|worker_id| {
            let state = state.clone();
            let queue_rx = queue_rx.clone();
            tokio::spawn(async move {
                loop {
                    let project = tokio::select! {
                        _ = state.cancel.cancelled() => break,
                        project = async { queue_rx.lock().await.recv().await } => {
                            match project {
                                Some(p) => p,
                                None => break,
                            }
                        }
                    };

                    run_pass(&state, worker_id, &project).await;

                    // Events that fired mid-pass re-queue the project
                    // so the most recent state gets observed.
                    if state.finish(&project) {
                        state.enqueue(&project).await;
                    }
                }
                tracing::debug!(worker = worker_id, "worker stopped");
            })
        })
        .collect()
}

async fn run_pass(state: &DaemonState, worker_id: usize, project: &PathBuf) {
    let engine = match state.engine_for(project).await {
        Ok(engine) => engine,
        Err(e) => {
            tracing::warn!(
                worker = worker_id,
                project = %project.display(),
                error = %e,
                "engine unavailable, pass skipped"
            );
            return;
        }
    };

    match engine.index().await {
        Ok(outcome) => {
            tracing::info!(
                worker = worker_id,
                project = %project.display(),
                files = outcome.files_indexed,
                symbols = outcome.symbols_written,
                embedded = outcome.chunks_embedded,
                "project indexed"
            );
            let stats = match engine.project_stats().await {
                Ok(stats) => stats,
                Err(_) => ProjectStats::default(),
            };
            if let Err(e) = state.registry.update_stats(project, stats) {
                tracing::debug!(error = %e, "registry stats not updated");
            }
            if let Err(e) = state.registry.set_last_indexed(project) {
                tracing::debug!(error = %e, "registry timestamp not updated");
            }
        }
        Err(e) => {
            tracing::warn!(
                worker = worker_id,
                project = %project.display(),
                error = %e,
                "index pass failed"
            );
        }
    }
}
