//! codetect MCP server.
//!
//! Exposes the search tools to AI coding agents over JSON-RPC on
//! stdio. Stdout carries protocol responses only; every diagnostic
//! goes to stderr.

mod tools;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use rmcp::{transport::stdio, ServiceExt};

use codetect_core::Engine;

/// codetect MCP server
#[derive(Parser, Debug)]
#[command(name = "codetect-mcp", version, about)]
struct Args {
    /// Path to the repository to serve.
    #[arg(long, default_value = ".")]
    repo: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Skip the automatic index pass when the index is empty.
    #[arg(long)]
    no_auto_index: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Stdout is the protocol channel; logs must go to stderr.
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

    let repo_path = std::path::PathBuf::from(&args.repo)
        .canonicalize()
        .unwrap_or_else(|_| std::path::PathBuf::from(&args.repo));
    if !repo_path.exists() {
        anyhow::bail!("repository path does not exist: {}", args.repo);
    }

    tracing::info!(repo = %repo_path.display(), "initializing engine");
    let engine = Arc::new(Engine::new(&repo_path).await?);

    if !args.no_auto_index {
        let stats = engine.stats().await?;
        if stats.file_count == 0 {
            tracing::info!("no existing index, running initial pass");
            match engine.index().await {
                Ok(outcome) => tracing::info!(
                    files = outcome.files_indexed,
                    symbols = outcome.symbols_written,
                    embedded = outcome.chunks_embedded,
                    "initial index complete"
                ),
                Err(e) => tracing::warn!(error = %e, "initial index failed"),
            }
        } else {
            tracing::info!(files = stats.file_count, "using existing index");
        }
    }

    tracing::info!("serving MCP over stdio");
    let service = tools::CodetectServer::new(engine).serve(stdio()).await?;
    service.waiting().await?;

    tracing::info!("MCP server stopped");
    Ok(())
}
