//! Unix-socket control plane.
//!
//! The socket is both the singleton liveness indicator and the command
//! channel. Each connection carries one line-delimited JSON command
//! and receives one JSON response line.
//!
//! ## Protocol
//!
//! Request: `{"action": "status"|"stop"|"reindex"|"add"|"remove", "path"?: "..."}`
//! Response: `{"status": "ok"|"error", "message"?: "...", "data"?: {...}}`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use crate::state::DaemonState;
use crate::watcher::WatcherSet;

/// One control command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    /// `status`, `stop`, `reindex`, `add`, or `remove`.
    pub action: String,
    /// Project path for `reindex`/`add`/`remove`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// One control response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// `ok` or `error`.
    pub status: String,
    /// Human-readable detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Action-specific payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Response {
    /// Success without payload.
    pub fn ok() -> Self {
        Self {
            status: "ok".into(),
            message: None,
            data: None,
        }
    }

    /// Success with payload.
    pub fn ok_with(data: serde_json::Value) -> Self {
        Self {
            status: "ok".into(),
            message: None,
            data: Some(data),
        }
    }

    /// Failure with message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            message: Some(message.into()),
            data: None,
        }
    }
}

/// Probe a socket for a live daemon: connect, send `status`, expect
/// any JSON response line.
pub async fn probe(socket_path: &Path) -> bool {
    let Ok(stream) = UnixStream::connect(socket_path).await else {
        return false;
    };
    let (reader, mut writer) = stream.into_split();
    if writer
        .write_all(b"{\"action\":\"status\"}\n")
        .await
        .is_err()
    {
        return false;
    }
    let mut line = String::new();
    let read = tokio::time::timeout(
        std::time::Duration::from_secs(2),
        BufReader::new(reader).read_line(&mut line),
    )
    .await;
    matches!(read, Ok(Ok(n)) if n > 0 && serde_json::from_str::<Response>(line.trim()).is_ok())
}

/// Accept-loop over the control socket until cancellation.
pub async fn serve(
    state: Arc<DaemonState>,
    watchers: Arc<WatcherSet>,
    listener: UnixListener,
) {
    loop {
        let stream = tokio::select! {
            _ = state.cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(e) => {
                    tracing::warn!(error = %e, "control accept failed");
                    continue;
                }
            },
        };

        let state = state.clone();
        let watchers = watchers.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(state, watchers, stream).await {
                tracing::debug!(error = %e, "control connection error");
            }
        });
    }
    tracing::debug!("control plane stopped");
}

async fn handle_connection(
    state: Arc<DaemonState>,
    watchers: Arc<WatcherSet>,
    stream: UnixStream,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut line = String::new();
    BufReader::new(reader).read_line(&mut line).await?;

    let response = match serde_json::from_str::<Command>(line.trim()) {
        Ok(command) => dispatch(&state, &watchers, command).await,
        Err(e) => Response::error(format!("invalid command: {e}")),
    };

    let mut payload = serde_json::to_string(&response)?;
    payload.push('\n');
    writer.write_all(payload.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

async fn dispatch(
    state: &Arc<DaemonState>,
    watchers: &Arc<WatcherSet>,
    command: Command,
) -> Response {
    tracing::debug!(action = %command.action, "control command");
    match command.action.as_str() {
        "status" => {
            let projects = state.registry.list().map(|p| p.len()).unwrap_or(0);
            Response::ok_with(serde_json::json!({
                "projects": projects,
                "watched": watchers.len(),
                "pending": state.pending_count(),
                "pid": std::process::id(),
            }))
        }

        "stop" => {
            tracing::info!("stop requested via control socket");
            state.cancel.cancel();
            Response::ok()
        }

        "reindex" => match required_path(&command) {
            Ok(path) => {
                state.enqueue(&path).await;
                Response::ok()
            }
            Err(response) => response,
        },

        "add" => match required_path(&command) {
            Ok(path) => match state.registry.add(&path) {
                Ok(project) => {
                    if project.watch_enabled {
                        if let Err(e) = watchers.watch(&path) {
                            return Response::error(format!("registered, but watch failed: {e}"));
                        }
                    }
                    state.enqueue(&path).await;
                    Response::ok_with(serde_json::json!({ "name": project.name }))
                }
                Err(e) => Response::error(e.to_string()),
            },
            Err(response) => response,
        },

        "remove" => match required_path(&command) {
            Ok(path) => match state.registry.remove(&path) {
                Ok(removed) => {
                    watchers.unwatch(&path);
                    state.evict_engine(&path).await;
                    Response::ok_with(serde_json::json!({ "removed": removed }))
                }
                Err(e) => Response::error(e.to_string()),
            },
            Err(response) => response,
        },

        other => Response::error(format!("unknown action: {other}")),
    }
}

fn required_path(command: &Command) -> Result<PathBuf, Response> {
    command
        .path
        .as_deref()
        .map(PathBuf::from)
        .ok_or_else(|| Response::error(format!("action {} requires a path", command.action)))
}
