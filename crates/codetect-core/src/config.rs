//! Configuration loading and host paths.
//!
//! Configuration is resolved with the following precedence (highest
//! wins):
//!
//! 1. Process environment (`CODETECT_*`)
//! 2. Host config file (`<config-dir>/codetect/config.env`)
//! 3. Compiled-in defaults
//!
//! The config file is a plain `KEY=VALUE` env file loaded with
//! `dotenvy`; it never overrides variables already present in the
//! environment.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CodetectError, CodetectResult};

/// Name of the per-project state directory at the repository root.
pub const PROJECT_STATE_DIR: &str = ".codetect";

// ---------------------------------------------------------------------------
// Top-level configuration
// ---------------------------------------------------------------------------

/// Top-level configuration for one codetect engine instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Absolute repository root this engine serves.
    pub repo_root: PathBuf,

    /// Database engine selection.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Embedding provider selection.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Chunking policy for the embedding pipeline.
    #[serde(default)]
    pub chunking: ChunkPolicy,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which relational engine backs the stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbEngine {
    /// Embedded file-backed engine (default).
    Sqlite,
    /// Networked engine for multi-repo or large deployments.
    Postgres,
}

/// Database engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Selected engine.
    pub engine: DbEngine,
    /// Connection string for the networked engine.
    pub dsn: Option<String>,
    /// File path override for the embedded engine.
    pub path: Option<PathBuf>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            engine: DbEngine::Sqlite,
            dsn: None,
            path: None,
        }
    }
}

impl DatabaseConfig {
    /// Resolve the embedded engine's database file path for a project.
    pub fn resolved_path(&self, repo_root: &Path) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| repo_root.join(PROJECT_STATE_DIR).join("symbols.db"))
    }
}

/// Which embedding provider to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    /// Local HTTP provider (one text per request).
    Ollama,
    /// OpenAI-compatible batch provider.
    Litellm,
    /// Semantic search disabled.
    Off,
}

/// Embedding provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Selected provider.
    pub provider: EmbeddingProviderKind,

    /// Base URL of the local HTTP provider.
    #[serde(default = "EmbeddingConfig::default_ollama_url")]
    pub ollama_url: String,

    /// Base URL of the OpenAI-compatible provider.
    #[serde(default = "EmbeddingConfig::default_litellm_url")]
    pub litellm_url: String,

    /// Bearer token for the OpenAI-compatible provider.
    pub litellm_api_key: Option<String>,

    /// Model name passed to the provider.
    #[serde(default = "EmbeddingConfig::default_model")]
    pub model: String,

    /// Expected output vector length.
    #[serde(default = "EmbeddingConfig::default_dimensions")]
    pub dimensions: usize,

    /// Per-request HTTP timeout in seconds.
    #[serde(default = "EmbeddingConfig::default_timeout_secs")]
    pub timeout_secs: u64,

    /// Embedding pipeline worker count.
    #[serde(default = "EmbeddingConfig::default_workers")]
    pub workers: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::Ollama,
            ollama_url: Self::default_ollama_url(),
            litellm_url: Self::default_litellm_url(),
            litellm_api_key: None,
            model: Self::default_model(),
            dimensions: Self::default_dimensions(),
            timeout_secs: Self::default_timeout_secs(),
            workers: Self::default_workers(),
        }
    }
}

impl EmbeddingConfig {
    fn default_ollama_url() -> String {
        "http://localhost:11434".into()
    }
    fn default_litellm_url() -> String {
        "http://localhost:4000".into()
    }
    fn default_model() -> String {
        "nomic-embed-text".into()
    }
    fn default_dimensions() -> usize {
        768
    }
    fn default_timeout_secs() -> u64 {
        30
    }
    fn default_workers() -> usize {
        1
    }
}

/// Chunking policy for the embedding pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChunkPolicy {
    /// Maximum lines per chunk.
    #[serde(default = "ChunkPolicy::default_max_chunk_lines")]
    pub max_chunk_lines: u32,

    /// Overlap between consecutive fixed-window chunks.
    #[serde(default = "ChunkPolicy::default_chunk_overlap")]
    pub chunk_overlap: u32,

    /// Chunks shorter than this are dropped or merged.
    #[serde(default = "ChunkPolicy::default_min_chunk_lines")]
    pub min_chunk_lines: u32,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            max_chunk_lines: Self::default_max_chunk_lines(),
            chunk_overlap: Self::default_chunk_overlap(),
            min_chunk_lines: Self::default_min_chunk_lines(),
        }
    }
}

impl ChunkPolicy {
    fn default_max_chunk_lines() -> u32 {
        30
    }
    fn default_chunk_overlap() -> u32 {
        15
    }
    fn default_min_chunk_lines() -> u32 {
        5
    }

    /// Lines the fixed chunker advances per step.
    pub fn stride(&self) -> u32 {
        self.max_chunk_lines.saturating_sub(self.chunk_overlap).max(1)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug").
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Output format: "text" or "json".
    #[serde(default = "LoggingConfig::default_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            format: Self::default_format(),
        }
    }
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".into()
    }
    fn default_format() -> String {
        "text".into()
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration for a project from defaults, the host
    /// `config.env` file, and `CODETECT_*` environment variables.
    pub fn load(repo_root: &Path) -> CodetectResult<Self> {
        let env_file = config_dir().join("config.env");
        if env_file.exists() {
            // Existing process env always wins over the file.
            let _ = dotenvy::from_path(&env_file);
        }

        let mut config = Self::defaults(repo_root);
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Create a default configuration for the given repo path.
    pub fn defaults(repo_root: &Path) -> Self {
        Self {
            repo_root: repo_root.to_path_buf(),
            database: DatabaseConfig::default(),
            embedding: EmbeddingConfig::default(),
            chunking: ChunkPolicy::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Apply `CODETECT_*` environment variable overrides.
    fn apply_env_overrides(&mut self) -> CodetectResult<()> {
        if let Ok(db_type) = std::env::var("CODETECT_DB_TYPE") {
            self.database.engine = match db_type.as_str() {
                "sqlite" => DbEngine::Sqlite,
                "postgres" => DbEngine::Postgres,
                other => {
                    return Err(CodetectError::Config {
                        details: format!("unknown CODETECT_DB_TYPE: {other}"),
                    });
                }
            };
        }
        if let Ok(dsn) = std::env::var("CODETECT_DB_DSN") {
            self.database.dsn = Some(dsn);
        }
        if let Ok(path) = std::env::var("CODETECT_DB_PATH") {
            self.database.path = Some(PathBuf::from(path));
        }

        if let Ok(provider) = std::env::var("CODETECT_EMBEDDING_PROVIDER") {
            self.embedding.provider = match provider.as_str() {
                "ollama" => EmbeddingProviderKind::Ollama,
                "litellm" => EmbeddingProviderKind::Litellm,
                "off" => EmbeddingProviderKind::Off,
                other => {
                    return Err(CodetectError::Config {
                        details: format!("unknown CODETECT_EMBEDDING_PROVIDER: {other}"),
                    });
                }
            };
        }
        if let Ok(url) = std::env::var("CODETECT_OLLAMA_URL") {
            self.embedding.ollama_url = url;
        }
        if let Ok(url) = std::env::var("CODETECT_LITELLM_URL") {
            self.embedding.litellm_url = url;
        }
        if let Ok(key) = std::env::var("CODETECT_LITELLM_API_KEY") {
            self.embedding.litellm_api_key = Some(key);
        }
        if let Ok(model) = std::env::var("CODETECT_EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
        if let Ok(dims) = std::env::var("CODETECT_VECTOR_DIMENSIONS") {
            self.embedding.dimensions =
                dims.parse().map_err(|_| CodetectError::Config {
                    details: format!("CODETECT_VECTOR_DIMENSIONS is not an integer: {dims}"),
                })?;
        }
        if let Ok(workers) = std::env::var("CODETECT_EMBED_WORKERS") {
            self.embedding.workers = workers
                .parse::<usize>()
                .map_err(|_| CodetectError::Config {
                    details: format!("CODETECT_EMBED_WORKERS is not an integer: {workers}"),
                })?
                .max(1);
        }

        if let Ok(level) = std::env::var("CODETECT_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("CODETECT_LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Host paths
// ---------------------------------------------------------------------------

/// Host-wide configuration directory (`<config-dir>/codetect`).
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("codetect")
}

/// Path of the host-wide project registry document.
pub fn registry_path() -> PathBuf {
    config_dir().join("registry.json")
}

/// Path of the daemon PID file.
pub fn pid_file_path() -> PathBuf {
    config_dir().join("daemon.pid")
}

/// Path of the daemon control socket, `/tmp/codetect-<uid>.sock`.
///
/// The uid is read from the home directory's metadata, which keeps
/// this crate free of direct syscall bindings.
pub fn control_socket_path() -> PathBuf {
    PathBuf::from(format!("/tmp/codetect-{}.sock", current_uid()))
}

#[cfg(unix)]
fn current_uid() -> u32 {
    use std::os::unix::fs::MetadataExt;
    dirs::home_dir()
        .and_then(|home| std::fs::metadata(home).ok())
        .map(|m| m.uid())
        .unwrap_or(0)
}

#[cfg(not(unix))]
fn current_uid() -> u32 {
    0
}
