//! Per-project event debouncing.
//!
//! Editors save in storms; each filesystem event resets the project's
//! timer, and only when a project has been quiet for the debounce
//! interval does it go onto the work queue. Combined with the state's
//! coalescing sets this yields exactly one queue entry per burst.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::state::DaemonState;

/// Tracks one deadline per project.
///
/// Pure state machine over injected `Instant`s so it can be tested
/// without waiting on real timers.
pub struct Debouncer {
    interval: Duration,
    deadlines: HashMap<PathBuf, Instant>,
}

impl Debouncer {
    /// Build a debouncer with the given quiet interval.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            deadlines: HashMap::new(),
        }
    }

    /// Record an event for a project at `now`, resetting its timer.
    pub fn note_event(&mut self, project: PathBuf, now: Instant) {
        self.deadlines.insert(project, now + self.interval);
    }

    /// The earliest pending deadline, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Remove and return every project whose deadline has passed.
    pub fn take_expired(&mut self, now: Instant) -> Vec<PathBuf> {
        let expired: Vec<PathBuf> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(project, _)| project.clone())
            .collect();
        for project in &expired {
            self.deadlines.remove(project);
        }
        expired
    }

    /// Number of projects with a pending timer.
    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    /// Whether no project has a pending timer.
    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

/// Drive the debouncer: consume watcher events, enqueue projects when
/// their timers expire, stop on cancellation.
pub async fn run(
    state: Arc<DaemonState>,
    mut events: mpsc::Receiver<PathBuf>,
    interval: Duration,
) {
    let mut debouncer = Debouncer::new(interval);

    loop {
        let sleep_until = debouncer
            .next_deadline()
            .map(tokio::time::Instant::from_std);

        tokio::select! {
            _ = state.cancel.cancelled() => break,

            event = events.recv() => {
                match event {
                    Some(project) => debouncer.note_event(project, Instant::now()),
                    None => break,
                }
            }

            () = async {
                match sleep_until {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    // No pending timer: park until an event arrives.
                    None => std::future::pending().await,
                }
            } => {
                for project in debouncer.take_expired(Instant::now()) {
                    tracing::debug!(project = %project.display(), "debounce expired, queueing");
                    state.enqueue(&project).await;
                }
            }
        }
    }

    tracing::debug!("debouncer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUIET: Duration = Duration::from_millis(500);

    #[test]
    fn test_burst_yields_single_expiry() {
        let mut debouncer = Debouncer::new(QUIET);
        let start = Instant::now();
        let project = PathBuf::from("/tmp/p");

        // Ten events inside 100ms.
        for i in 0..10 {
            debouncer.note_event(project.clone(), start + Duration::from_millis(i * 10));
        }
        assert_eq!(debouncer.len(), 1, "one timer per project");

        // Nothing expires before the last event's deadline.
        let early = start + Duration::from_millis(90) + QUIET - Duration::from_millis(1);
        assert!(debouncer.take_expired(early).is_empty());

        let late = start + Duration::from_millis(90) + QUIET;
        let expired = debouncer.take_expired(late);
        assert_eq!(expired, vec![project]);
        assert!(debouncer.is_empty());
    }

    #[test]
    fn test_each_event_resets_the_timer() {
        let mut debouncer = Debouncer::new(QUIET);
        let start = Instant::now();
        let project = PathBuf::from("/tmp/p");

        debouncer.note_event(project.clone(), start);
        debouncer.note_event(project.clone(), start + Duration::from_millis(400));

        // The first deadline has passed, but the timer was reset.
        assert!(debouncer.take_expired(start + QUIET).is_empty());
        assert_eq!(
            debouncer.take_expired(start + Duration::from_millis(400) + QUIET),
            vec![project]
        );
    }

    #[test]
    fn test_projects_expire_independently() {
        let mut debouncer = Debouncer::new(QUIET);
        let start = Instant::now();

        debouncer.note_event(PathBuf::from("/tmp/a"), start);
        debouncer.note_event(PathBuf::from("/tmp/b"), start + Duration::from_millis(300));

        let first = debouncer.take_expired(start + QUIET);
        assert_eq!(first, vec![PathBuf::from("/tmp/a")]);
        assert_eq!(debouncer.len(), 1);

        let second = debouncer.take_expired(start + Duration::from_millis(300) + QUIET);
        assert_eq!(second, vec![PathBuf::from("/tmp/b")]);
    }

    #[test]
    fn test_next_deadline_is_earliest() {
        let mut debouncer = Debouncer::new(QUIET);
        let start = Instant::now();

        assert!(debouncer.next_deadline().is_none());
        debouncer.note_event(PathBuf::from("/tmp/b"), start + Duration::from_millis(100));
        debouncer.note_event(PathBuf::from("/tmp/a"), start);
        assert_eq!(debouncer.next_deadline(), Some(start + QUIET));
    }
}
