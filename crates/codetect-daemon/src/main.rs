//! codetect daemon -- keeps project indexes fresh as files change.
//!
//! One long-running process per user. Three cooperating activities:
//! recursive filesystem watchers per registered project, a per-project
//! debouncer feeding a bounded work queue, and a fixed worker pool
//! running engine passes. A Unix-domain socket is both the singleton
//! liveness indicator and the control plane.
//!
//! ## Lifecycle
//!
//! Startup refuses to run if the socket answers a `status` probe;
//! a stale socket file is removed and rebound. `stop` over the socket
//! or SIGTERM/SIGINT starts graceful shutdown: stop accepting
//! commands, stop the watchers, drain the workers, remove the socket
//! and PID file, exit.

mod control;
mod debounce;
mod state;
mod watcher;
mod workers;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use codetect_core::registry::Registry;
use tokio::net::UnixListener;
use tokio::sync::mpsc;

use state::{DaemonState, WORK_QUEUE_CAPACITY};
use watcher::WatcherSet;

/// Exit code for "daemon already running".
const EXIT_ALREADY_RUNNING: i32 = 2;

/// codetect daemon -- background index freshness
#[derive(Parser, Debug)]
#[command(
    name = "codetect-daemon",
    version,
    about = "Watches registered projects and keeps their indexes fresh"
)]
struct Args {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Control socket path override.
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Skip the initial index pass over registered projects.
    #[arg(long)]
    no_initial_index: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let json_logs = std::env::var("CODETECT_LOG_FORMAT").is_ok_and(|f| f == "json");
    let filter = std::env::var("CODETECT_LOG_LEVEL").unwrap_or_else(|_| args.log_level.clone());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json_logs {
        builder.json().init();
    } else {
        builder.init();
    }

    let socket_path = args
        .socket
        .clone()
        .unwrap_or_else(codetect_core::config::control_socket_path);

    // Singleton: a live daemon answers the probe; refuse to start.
    if control::probe(&socket_path).await {
        eprintln!("daemon already running at {}", socket_path.display());
        std::process::exit(EXIT_ALREADY_RUNNING);
    }
    // Stale socket from an unclean shutdown.
    let _ = std::fs::remove_file(&socket_path);

    let pid_path = codetect_core::config::pid_file_path();
    if let Some(parent) = pid_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&pid_path, std::process::id().to_string())?;

    let registry = Registry::at_default_path();
    let settings = registry.settings()?;

    let (queue_tx, queue_rx) = mpsc::channel::<PathBuf>(WORK_QUEUE_CAPACITY);
    let state = Arc::new(DaemonState::new(registry, queue_tx));

    // Watchers feed raw events to the debouncer.
    let (event_tx, event_rx) = mpsc::channel::<PathBuf>(1024);
    let watchers = Arc::new(WatcherSet::new(event_tx));

    let projects = state.registry.list()?;
    for project in &projects {
        let path = PathBuf::from(&project.path);
        if !path.exists() {
            tracing::warn!(project = %project.path, "registered project missing on disk");
            continue;
        }
        if project.watch_enabled {
            if let Err(e) = watchers.watch(&path) {
                tracing::warn!(project = %project.path, error = %e, "watch failed");
            }
        }
        if !args.no_initial_index {
            state.enqueue(&path).await;
        }
    }
    tracing::info!(
        projects = projects.len(),
        watched = watchers.len(),
        debounce_ms = settings.debounce_ms,
        "daemon started"
    );

    let debouncer = tokio::spawn(debounce::run(
        state.clone(),
        event_rx,
        Duration::from_millis(settings.debounce_ms),
    ));
    let worker_handles = workers::spawn(state.clone(), queue_rx);

    let listener = UnixListener::bind(&socket_path)?;
    let control = tokio::spawn(control::serve(state.clone(), watchers.clone(), listener));

    // SIGTERM / SIGINT trigger the same graceful path as `stop`.
    let signal_state = state.clone();
    tokio::spawn(async move {
        let mut sigterm = match tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::terminate(),
        ) {
            Ok(signal) => signal,
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                return;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("SIGTERM received"),
            result = tokio::signal::ctrl_c() => {
                if result.is_ok() {
                    tracing::info!("SIGINT received");
                }
            }
        }
        signal_state.cancel.cancel();
    });

    state.cancel.cancelled().await;
    tracing::info!("shutting down");

    watchers.clear();
    let _ = control.await;
    let _ = debouncer.await;
    for handle in worker_handles {
        let _ = handle.await;
    }

    let _ = std::fs::remove_file(&socket_path);
    let _ = std::fs::remove_file(&pid_path);
    tracing::info!("daemon stopped");
    Ok(())
}
