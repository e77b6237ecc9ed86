//! Error types for codetect-core.
//!
//! Uses a hierarchical error enum so callers can pattern-match on the
//! failure class. Configuration errors are fatal for the affected
//! subsystem only, per-item failures are logged and skipped by the
//! caller, and integrity errors refuse the write.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for all codetect-core operations.
#[derive(Debug, Error)]
pub enum CodetectError {
    // ---- Configuration (fatal for the affected subsystem) ----
    /// Configuration is invalid or missing required fields.
    #[error("configuration error: {details}")]
    Config {
        /// What's wrong with the config.
        details: String,
    },

    // ---- Per-item (isolated: logged, skipped, counted) ----
    /// A single file failed to extract. The rest of the batch is fine.
    #[error("extract error for {path}: {message}")]
    Extract {
        /// Path to the file that failed.
        path: PathBuf,
        /// Human-readable error description.
        message: String,
    },

    /// Embedding failed for a chunk. Other chunks still embed.
    #[error("embedding error: {message}")]
    Embed {
        /// Human-readable error description.
        message: String,
    },

    // ---- Degraded (system works with reduced capability) ----
    /// Embedding provider is unavailable. Semantic search is disabled;
    /// symbol and keyword tools keep serving.
    #[error("embedder unavailable: {reason}")]
    EmbedderUnavailable {
        /// Why the provider couldn't be reached or was disabled.
        reason: String,
    },

    // ---- Integrity (surface immediately, refuse to write) ----
    /// A vector's length does not match the table's dimension group.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimensions the store is configured for.
        expected: usize,
        /// Dimensions of the rejected vector.
        actual: usize,
    },

    /// On-disk schema is newer than this build understands.
    #[error("schema version {found} is newer than supported version {supported}")]
    SchemaVersion {
        /// Version recorded in the database.
        found: i64,
        /// Highest version this build can open.
        supported: i64,
    },

    /// The project registry is at its configured capacity.
    #[error("registry full: {max} projects already registered")]
    RegistryFull {
        /// Configured `max_projects` bound.
        max: usize,
    },

    /// Requested entity was not found.
    #[error("not found: {entity}")]
    NotFound {
        /// Description of what was not found.
        entity: String,
    },

    // ---- Wrapped external errors ----
    /// SQLite error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Postgres error.
    #[error("postgres error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// HTTP error from an embedding provider.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal error for unexpected conditions.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results in codetect-core.
pub type CodetectResult<T> = Result<T, CodetectError>;
