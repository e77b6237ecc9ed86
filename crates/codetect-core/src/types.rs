//! Core domain types shared across all codetect-core subsystems.
//!
//! These types form the API contract between modules. Every persisted
//! artefact carries the owning project's `repo_root`; stores must
//! scope all reads, writes, and deletes by it.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Language
// ---------------------------------------------------------------------------

/// Source languages the indexer recognises by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Rust (.rs)
    Rust,
    /// Python (.py)
    Python,
    /// Go (.go)
    Go,
    /// JavaScript (.js, .jsx)
    JavaScript,
    /// TypeScript (.ts, .tsx)
    TypeScript,
    /// Java (.java)
    Java,
    /// C (.c, .h)
    C,
    /// C++ (.cpp, .cc, .hpp)
    Cpp,
    /// C# (.cs)
    CSharp,
    /// Ruby (.rb)
    Ruby,
    /// PHP (.php)
    Php,
    /// Shell (.sh, .bash)
    Shell,
    /// Unknown / unsupported
    Unknown,
}

impl Language {
    /// Detect language from a file extension.
    pub fn from_extension(ext: &str) -> Self {
        match ext {
            "rs" => Self::Rust,
            "py" => Self::Python,
            "go" => Self::Go,
            "js" | "jsx" | "mjs" | "cjs" => Self::JavaScript,
            "ts" | "tsx" => Self::TypeScript,
            "java" => Self::Java,
            "c" | "h" => Self::C,
            "cpp" | "cc" | "cxx" | "hpp" | "hxx" | "hh" => Self::Cpp,
            "cs" => Self::CSharp,
            "rb" => Self::Ruby,
            "php" => Self::Php,
            "sh" | "bash" | "zsh" => Self::Shell,
            _ => Self::Unknown,
        }
    }

    /// Returns the language identifier string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Python => "python",
            Self::Go => "go",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Java => "java",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::CSharp => "csharp",
            Self::Ruby => "ruby",
            Self::Php => "php",
            Self::Shell => "shell",
            Self::Unknown => "unknown",
        }
    }

    /// Returns true if the structural (tree-sitter) extractor supports
    /// this language. Everything else falls back to the tag backend.
    pub fn has_structural_support(&self) -> bool {
        matches!(
            self,
            Self::Rust | Self::Python | Self::Go | Self::JavaScript | Self::TypeScript
        )
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Symbols and file records
// ---------------------------------------------------------------------------

/// Symbol kinds whose boundaries make good embedding chunks.
///
/// The extractor taxonomy is open-ended; everything outside this set
/// is stored but treated as opaque by the chunker.
pub const RELEVANT_KINDS: [&str; 6] =
    ["function", "method", "struct", "class", "type", "interface"];

/// Returns true if the kind participates in chunk boundary selection.
pub fn is_relevant_kind(kind: &str) -> bool {
    RELEVANT_KINDS.contains(&kind)
}

/// A named construct in source code, located at `(path, line)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    /// Absolute path of the owning project.
    pub repo_root: String,
    /// Symbol name (e.g. `validate_token`).
    pub name: String,
    /// Lower-case kind from the extractor taxonomy (e.g. `function`).
    pub kind: String,
    /// Path relative to the repository root.
    pub path: String,
    /// 1-indexed line of the definition.
    pub line: u32,
    /// Source language, when the extractor reports it.
    pub language: Option<String>,
    /// Search pattern for the definition line, when available.
    pub pattern: Option<String>,
    /// Enclosing scope (e.g. a class name), when available.
    pub scope: Option<String>,
    /// Signature text, when available.
    pub signature: Option<String>,
}

/// One row per file currently known to the symbol index.
///
/// A file needs re-indexing iff it is new or its `(mtime_ns, size)`
/// differs from the recorded pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Absolute path of the owning project.
    pub repo_root: String,
    /// Path relative to the repository root.
    pub path: String,
    /// Modification time in nanoseconds since the epoch.
    pub mtime_ns: i64,
    /// File size in bytes.
    pub size: i64,
    /// When this row was last written (epoch seconds).
    pub indexed_at: i64,
}

/// Counts reported by the symbol store for one project.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    /// Number of symbol rows.
    pub symbol_count: usize,
    /// Number of file rows.
    pub file_count: usize,
}

// ---------------------------------------------------------------------------
// Chunks and embeddings
// ---------------------------------------------------------------------------

/// A contiguous line range of a file, selected as an embedding unit.
///
/// Chunks are transient: the chunker produces them, the embedding
/// store persists their coordinates and hash, never the struct itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Path relative to the repository root.
    pub path: String,
    /// First line of the chunk (1-indexed, inclusive).
    pub start_line: u32,
    /// Last line of the chunk (1-indexed, inclusive).
    pub end_line: u32,
    /// The chunk text.
    pub content: String,
    /// Kind of the symbol this chunk covers, or `fixed` for window
    /// chunks.
    pub kind: String,
}

impl Chunk {
    /// SHA-256 over the chunk text, the dedup key for embeddings.
    pub fn content_hash(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.content.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Number of lines covered by this chunk.
    pub fn line_count(&self) -> u32 {
        self.end_line - self.start_line + 1
    }
}

/// A persisted embedding row.
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    /// Absolute path of the owning project.
    pub repo_root: String,
    /// Path relative to the repository root.
    pub path: String,
    /// First line of the embedded chunk.
    pub start_line: u32,
    /// Last line of the embedded chunk.
    pub end_line: u32,
    /// SHA-256 of the producing chunk's text.
    pub content_hash: String,
    /// The embedding vector. `vector.len()` equals the dimension
    /// group of the table the row lives in.
    pub vector: Vec<f32>,
    /// Stable provider token, `provider:model`.
    pub model: String,
    /// When the row was written (epoch seconds).
    pub created_at: i64,
}

/// Which model a project is currently embedded under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoEmbeddingConfig {
    /// Absolute path of the project.
    pub repo_root: String,
    /// Stable provider token, `provider:model`.
    pub model: String,
    /// Vector length for every embedding row of this project.
    pub dimensions: usize,
    /// When the config row was created (epoch seconds).
    pub created_at: i64,
    /// When the config row was last updated (epoch seconds).
    pub updated_at: i64,
}

// ---------------------------------------------------------------------------
// Search results
// ---------------------------------------------------------------------------

/// One semantic search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticHit {
    /// Path relative to the repository root.
    pub path: String,
    /// First line of the matched chunk.
    pub start_line: u32,
    /// Last line of the matched chunk.
    pub end_line: u32,
    /// Cosine similarity in `(0, 1)`; non-positive scores are dropped.
    pub score: f32,
    /// Code excerpt, truncated at a newline near 500 characters.
    pub snippet: String,
}

/// Result envelope for semantic search; `available: false` means the
/// embedder is offline and `results` is empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticSearchResponse {
    /// Whether semantic search is currently serving.
    pub available: bool,
    /// Ranked results, best first.
    pub results: Vec<SemanticHit>,
}

/// One keyword scan hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordHit {
    /// Path relative to the repository root.
    pub path: String,
    /// 1-indexed line of the match.
    pub line: u32,
    /// The matched line, trimmed.
    pub snippet: String,
}

/// One fused hybrid-search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridHit {
    /// Path relative to the repository root.
    pub path: String,
    /// First line of the merged range.
    pub line_start: u32,
    /// Last line of the merged range.
    pub line_end: u32,
    /// Representative snippet for the range.
    pub snippet: String,
    /// Weighted fused score.
    pub score: f32,
    /// Which retrieval sources contributed (`keyword`, `symbol`,
    /// `semantic`).
    pub sources: Vec<String>,
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Current time as Unix epoch seconds.
pub fn now_secs() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
