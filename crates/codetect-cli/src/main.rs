//! codetect CLI.
//!
//! Operator commands for indexing, searching, project registration,
//! and daemon control. Daemon subcommands speak the line-delimited
//! JSON control protocol over the Unix socket.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use codetect_core::registry::Registry;
use codetect_core::tools::SemanticTools;
use codetect_core::Engine;

/// codetect - per-project code intelligence
#[derive(Parser, Debug)]
#[command(name = "codetect", version, about = "Code intelligence service for AI coding agents")]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,

    /// Log level.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Index a repository incrementally.
    Index {
        /// Path to the repository root.
        #[arg(default_value = ".")]
        path: String,

        /// Drop all rows and rebuild from scratch.
        #[arg(long)]
        force: bool,
    },

    /// Search the repository (hybrid by default).
    Search {
        /// Search query.
        query: String,

        /// Path to the repository root.
        #[arg(long, default_value = ".")]
        path: String,

        /// Maximum number of results.
        #[arg(short, long, default_value_t = 10)]
        limit: usize,

        /// Retrieval mode.
        #[arg(long, default_value = "hybrid", value_parser = ["hybrid", "semantic", "keyword"])]
        mode: String,
    },

    /// Look up symbols by name.
    Symbol {
        /// Symbol name or fragment.
        name: String,

        /// Path to the repository root.
        #[arg(long, default_value = ".")]
        path: String,

        /// Restrict to one kind (function, struct, class, ...).
        #[arg(long)]
        kind: Option<String>,

        /// Maximum number of results.
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// List every definition in one file.
    Defs {
        /// File path relative to the repository root.
        file: String,

        /// Path to the repository root.
        #[arg(long, default_value = ".")]
        path: String,
    },

    /// Show index status for a repository.
    Status {
        /// Path to the repository root.
        #[arg(default_value = ".")]
        path: String,
    },

    /// Register a project in the host registry.
    Register {
        /// Path to the repository root.
        #[arg(default_value = ".")]
        path: String,
    },

    /// Remove a project from the host registry.
    Unregister {
        /// Path to the repository root.
        #[arg(default_value = ".")]
        path: String,
    },

    /// List registered projects.
    Projects,

    /// Control the background daemon.
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
}

#[derive(Subcommand, Debug)]
enum DaemonAction {
    /// Start the daemon in the background.
    Start,
    /// Stop the running daemon.
    Stop,
    /// Show daemon status.
    Status,
    /// Ask the daemon to reindex a project.
    Reindex {
        /// Path to the repository root.
        #[arg(default_value = ".")]
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(&cli.log_level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Index { path, force } => {
            let engine = open_engine(&path).await?;
            let outcome = if force {
                engine.full_reindex().await?
            } else {
                engine.index().await?
            };
            println!(
                "indexed {} files ({} symbols, {} chunks embedded, {} skipped, {} failed)",
                outcome.files_indexed,
                outcome.symbols_written,
                outcome.chunks_embedded,
                outcome.chunks_skipped,
                outcome.files_failed,
            );
        }

        Commands::Search { query, path, limit, mode } => {
            let engine = Arc::new(open_engine(&path).await?);
            match mode.as_str() {
                "keyword" => {
                    for hit in engine.search_keyword(&query, limit)? {
                        println!("{}:{}: {}", hit.path, hit.line, hit.snippet);
                    }
                }
                "semantic" => {
                    let response = engine.search_semantic(&query, limit).await?;
                    if !response.available {
                        bail!("semantic search unavailable (no embedding provider)");
                    }
                    for hit in response.results {
                        println!(
                            "{}:{}-{} ({:.3})\n{}\n",
                            hit.path, hit.start_line, hit.end_line, hit.score, hit.snippet
                        );
                    }
                }
                _ => {
                    let tools = SemanticTools::new(engine);
                    for hit in tools.hybrid_search(&query, limit).await? {
                        println!(
                            "{}:{}-{} ({:.3}) [{}]\n{}\n",
                            hit.path,
                            hit.line_start,
                            hit.line_end,
                            hit.score,
                            hit.sources.join("+"),
                            hit.snippet
                        );
                    }
                }
            }
        }

        Commands::Symbol { name, path, kind, limit } => {
            let engine = open_engine(&path).await?;
            for symbol in engine.find_symbol(&name, kind.as_deref(), limit).await? {
                let scope = symbol
                    .scope
                    .map(|s| format!(" (in {s})"))
                    .unwrap_or_default();
                println!("{}:{} {} {}{}", symbol.path, symbol.line, symbol.kind, symbol.name, scope);
            }
        }

        Commands::Defs { file, path } => {
            let engine = open_engine(&path).await?;
            for symbol in engine.list_defs_in_file(&file).await? {
                println!("{:>5}  {:10} {}", symbol.line, symbol.kind, symbol.name);
            }
        }

        Commands::Status { path } => {
            let engine = open_engine(&path).await?;
            let status = engine.status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }

        Commands::Register { path } => {
            let root = canonical(&path)?;
            let registry = Registry::at_default_path();
            let project = registry.add(&root)?;
            println!("registered {} ({})", project.name, project.path);
        }

        Commands::Unregister { path } => {
            let root = canonical(&path)?;
            let registry = Registry::at_default_path();
            if registry.remove(&root)? {
                println!("unregistered {}", root.display());
            } else {
                println!("not registered: {}", root.display());
            }
        }

        Commands::Projects => {
            let registry = Registry::at_default_path();
            let projects = registry.list()?;
            if projects.is_empty() {
                println!("no projects registered");
            }
            for project in projects {
                let watch = if project.watch_enabled { "watched" } else { "unwatched" };
                println!(
                    "{}  {}  symbols={} embeddings={}  [{}]",
                    project.name,
                    project.path,
                    project.index_stats.symbols,
                    project.index_stats.embeddings,
                    watch,
                );
            }
        }

        Commands::Daemon { action } => match action {
            DaemonAction::Start => {
                let socket = codetect_core::config::control_socket_path();
                if send_command("status", None).await.is_ok() {
                    bail!("daemon already running at {}", socket.display());
                }
                std::process::Command::new("codetect-daemon")
                    .spawn()
                    .context("failed to spawn codetect-daemon (is it on PATH?)")?;
                println!("daemon starting (socket {})", socket.display());
            }
            DaemonAction::Stop => {
                let response = send_command("stop", None).await?;
                println!("{response}");
            }
            DaemonAction::Status => {
                let response = send_command("status", None).await?;
                println!("{response}");
            }
            DaemonAction::Reindex { path } => {
                let root = canonical(&path)?;
                let response =
                    send_command("reindex", Some(root.to_string_lossy().as_ref())).await?;
                println!("{response}");
            }
        },
    }

    Ok(())
}

async fn open_engine(path: &str) -> Result<Engine> {
    let root = canonical(path)?;
    Engine::new(&root).await.context("failed to open engine")
}

fn canonical(path: &str) -> Result<PathBuf> {
    PathBuf::from(path)
        .canonicalize()
        .with_context(|| format!("path does not exist: {path}"))
}

/// Send one control command to the daemon socket and return the raw
/// JSON response line.
async fn send_command(action: &str, path: Option<&str>) -> Result<String> {
    let socket = codetect_core::config::control_socket_path();
    let stream = UnixStream::connect(&socket)
        .await
        .with_context(|| format!("daemon not reachable at {}", socket.display()))?;
    let (reader, mut writer) = stream.into_split();

    let command = match path {
        Some(p) => serde_json::json!({ "action": action, "path": p }),
        None => serde_json::json!({ "action": action }),
    };
    let mut line = serde_json::to_string(&command)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;

    let mut response = String::new();
    BufReader::new(reader).read_line(&mut response).await?;
    Ok(response.trim().to_string())
}
