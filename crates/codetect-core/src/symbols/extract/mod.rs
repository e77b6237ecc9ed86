//! Symbol extraction backends.
//!
//! An extractor turns a batch of files into symbols. Two backends are
//! provided: an external tag generator spoken to in its JSON output
//! mode, and a structural backend that walks tree-sitter ASTs with
//! per-language patterns. Neither ever executes source code.
//!
//! The result maps each *processed* file path to its symbols; a file
//! absent from the map was refused and will be retried on the next
//! pass. A present-but-empty entry means the file genuinely has no
//! symbols and must not be retried.

pub mod ctags;
pub mod structural;

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;

pub use ctags::CtagsExtractor;
pub use structural::TreeSitterExtractor;

use crate::error::CodetectResult;
use crate::symbols::scan::ScannedFile;
use crate::types::Symbol;

/// Pluggable symbol extraction over a batch of files.
#[async_trait]
pub trait SymbolExtractor: Send + Sync {
    /// Backend name for diagnostics.
    fn name(&self) -> &'static str;

    /// Extract symbols for the given files.
    ///
    /// Returns one entry per processed file (possibly empty); files
    /// the backend refused are omitted.
    async fn extract(
        &self,
        repo_root: &Path,
        files: &[ScannedFile],
    ) -> CodetectResult<HashMap<String, Vec<Symbol>>>;
}

/// Selection policy: structural backend for the languages it supports,
/// tag backend for everything else, zero symbols when neither applies.
pub struct AutoExtractor {
    structural: TreeSitterExtractor,
    ctags: Option<CtagsExtractor>,
}

impl AutoExtractor {
    /// Probe available backends and build the router.
    pub fn detect() -> Self {
        let ctags = CtagsExtractor::detect();
        match &ctags {
            Some(c) => tracing::debug!(binary = %c.binary(), "tag backend available"),
            None => tracing::debug!("tag backend unavailable, structural only"),
        }
        Self {
            structural: TreeSitterExtractor::new(),
            ctags,
        }
    }

    /// Build with explicit backends (for testing).
    pub fn with_backends(
        structural: TreeSitterExtractor,
        ctags: Option<CtagsExtractor>,
    ) -> Self {
        Self { structural, ctags }
    }
}

#[async_trait]
impl SymbolExtractor for AutoExtractor {
    fn name(&self) -> &'static str {
        "auto"
    }

    async fn extract(
        &self,
        repo_root: &Path,
        files: &[ScannedFile],
    ) -> CodetectResult<HashMap<String, Vec<Symbol>>> {
        let (structural_files, rest): (Vec<ScannedFile>, Vec<ScannedFile>) = files
            .iter()
            .cloned()
            .partition(|f| f.language.has_structural_support());

        let mut out = self.structural.extract(repo_root, &structural_files).await?;

        match &self.ctags {
            Some(ctags) if !rest.is_empty() => {
                out.extend(ctags.extract(repo_root, &rest).await?);
            }
            _ => {
                // No tag backend: these files are processed with zero
                // symbols so symbol search degrades cleanly instead of
                // retrying forever.
                for file in &rest {
                    out.entry(file.path.clone()).or_default();
                }
            }
        }

        Ok(out)
    }
}

/// Extractor backed by a fixed symbol table; a test double.
///
/// Files not listed in the table are treated as refused, which makes
/// failure-isolation paths testable.
pub struct StaticExtractor {
    table: HashMap<String, Vec<Symbol>>,
}

impl StaticExtractor {
    /// An extractor that refuses every file.
    pub fn empty() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    /// Build from `(path, symbol)` pairs.
    pub fn with_symbols(entries: Vec<(&str, Symbol)>) -> Self {
        let mut table: HashMap<String, Vec<Symbol>> = HashMap::new();
        for (path, mut symbol) in entries {
            symbol.path = path.to_string();
            table.entry(path.to_string()).or_default().push(symbol);
        }
        Self { table }
    }
}

#[async_trait]
impl SymbolExtractor for StaticExtractor {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn extract(
        &self,
        _repo_root: &Path,
        files: &[ScannedFile],
    ) -> CodetectResult<HashMap<String, Vec<Symbol>>> {
        let mut out = HashMap::new();
        for file in files {
            if let Some(symbols) = self.table.get(&file.path) {
                out.insert(file.path.clone(), symbols.clone());
            }
        }
        Ok(out)
    }
}
