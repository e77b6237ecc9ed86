//! Pipeline orchestrator.
//!
//! Wires the subsystems into one engine per project. This is the
//! top-level public API of codetect-core.
//!
//! ## Dataflow
//!
//! ```text
//! scan --> change set --> extractor --> symbol store (one tx per batch)
//!                             |
//!                             v
//!                         chunker --> has-embedding filter
//!                             |
//!                             v
//!                  worker pool --> embedder --> save_batch
//! ```
//!
//! Search reads go straight to the stores; they are eventually
//! consistent with respect to concurrent index passes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::chunker;
use crate::config::Config;
use crate::embedder::{self, Embedder};
use crate::embeddings::EmbeddingStore;
use crate::error::{CodetectError, CodetectResult};
use crate::registry::ProjectStats;
use crate::search::keyword;
use crate::search::{SemanticSearcher, SnippetFn};
use crate::storage::Database;
use crate::symbols::{AutoExtractor, SymbolExtractor, SymbolStore};
use crate::types::{Chunk, IndexStats, KeywordHit, SemanticSearchResponse, Symbol};

/// The per-project codetect engine.
///
/// Owns the database handle, both stores, the extractor, and the
/// embedding provider. Clone-free: share it behind an `Arc`.
pub struct Engine {
    config: Config,
    repo_key: String,
    db: Arc<Database>,
    symbols: SymbolStore,
    embeddings: Arc<EmbeddingStore>,
    embedder: Arc<dyn Embedder>,
    extractor: Box<dyn SymbolExtractor>,
    searcher: SemanticSearcher,
}

impl Engine {
    /// Create an engine for the given repository using environment
    /// configuration.
    pub async fn new(repo_root: &std::path::Path) -> CodetectResult<Self> {
        let config = Config::load(repo_root)?;
        Self::with_config(config).await
    }

    /// Create an engine with explicit configuration.
    pub async fn with_config(config: Config) -> CodetectResult<Self> {
        let db = Arc::new(Database::open(&config).await?);
        let embedder = embedder::from_config(&config.embedding)?;
        let extractor = Box::new(AutoExtractor::detect());
        Self::assemble(config, db, embedder, extractor).await
    }

    /// Create an engine from preassembled parts (for testing and for
    /// callers that share one database across projects).
    pub async fn with_components(
        config: Config,
        db: Arc<Database>,
        embedder: Arc<dyn Embedder>,
        extractor: Box<dyn SymbolExtractor>,
    ) -> CodetectResult<Self> {
        Self::assemble(config, db, embedder, extractor).await
    }

    async fn assemble(
        config: Config,
        db: Arc<Database>,
        embedder: Arc<dyn Embedder>,
        extractor: Box<dyn SymbolExtractor>,
    ) -> CodetectResult<Self> {
        let symbols = SymbolStore::open(db.clone()).await?;
        let embeddings = Arc::new(EmbeddingStore::open(db.clone()).await?);
        let searcher = SemanticSearcher::new(embedder.clone(), embeddings.clone());
        let repo_key = config.repo_root.to_string_lossy().to_string();

        tracing::info!(
            repo = %repo_key,
            embedder = %embedder.provider_id(),
            embedder_available = embedder.is_available(),
            "engine initialized"
        );

        Ok(Self {
            config,
            repo_key,
            db,
            symbols,
            embeddings,
            embedder,
            extractor,
            searcher,
        })
    }

    /// Absolute path of the project this engine serves.
    pub fn repo_root(&self) -> &std::path::Path {
        &self.config.repo_root
    }

    /// The repo key used to scope every store row.
    pub fn repo_key(&self) -> &str {
        &self.repo_key
    }

    /// Whether semantic search can currently serve.
    pub fn embedder_available(&self) -> bool {
        self.embedder.is_available()
    }

    // -----------------------------------------------------------------
    // Indexing
    // -----------------------------------------------------------------

    /// Run one incremental index pass: symbols, then embeddings for
    /// the changed files.
    pub async fn index(&self) -> CodetectResult<IndexOutcome> {
        let summary = self
            .symbols
            .update(&self.config.repo_root, self.extractor.as_ref())
            .await?;
        let mut outcome = IndexOutcome {
            files_indexed: summary.files_indexed,
            files_removed: summary.files_removed,
            files_failed: summary.files_failed,
            symbols_written: summary.symbols_written,
            ..IndexOutcome::default()
        };
        self.embed_pass(&summary.changed_paths, &summary.removed_paths, &mut outcome)
            .await?;
        tracing::info!(
            repo = %self.repo_key,
            files = outcome.files_indexed,
            removed = outcome.files_removed,
            symbols = outcome.symbols_written,
            embedded = outcome.chunks_embedded,
            skipped = outcome.chunks_skipped,
            embed_failures = outcome.embed_failures,
            "index pass complete"
        );
        Ok(outcome)
    }

    /// Drop everything for this repo and rebuild from scratch.
    pub async fn full_reindex(&self) -> CodetectResult<IndexOutcome> {
        self.embeddings.delete_all(&self.repo_key).await?;
        let summary = self
            .symbols
            .full_reindex(&self.config.repo_root, self.extractor.as_ref())
            .await?;
        let mut outcome = IndexOutcome {
            files_indexed: summary.files_indexed,
            files_removed: summary.files_removed,
            files_failed: summary.files_failed,
            symbols_written: summary.symbols_written,
            ..IndexOutcome::default()
        };
        self.embed_pass(&summary.changed_paths, &summary.removed_paths, &mut outcome)
            .await?;
        Ok(outcome)
    }

    /// Embedding pipeline for one batch of changed/removed files.
    async fn embed_pass(
        &self,
        changed: &[String],
        removed: &[String],
        outcome: &mut IndexOutcome,
    ) -> CodetectResult<()> {
        for path in removed {
            self.embeddings.delete_by_path(&self.repo_key, path).await?;
        }

        if !self.embedder.is_available() || changed.is_empty() {
            return Ok(());
        }

        let model = self.embedder.provider_id();
        let dimensions = self.embedder.dimensions();

        // Service a model switch before touching the vector tables.
        let (old, mismatch) = self
            .embeddings
            .check_dimension_mismatch(&self.repo_key, dimensions)
            .await?;
        if mismatch {
            let old = old.unwrap_or(dimensions);
            self.embeddings
                .migrate_repo_dimensions(&self.repo_key, old, dimensions, &model)
                .await?;
        }

        // Chunk changed files, drop stale rows, keep only unseen chunks.
        let mut jobs: Vec<Chunk> = Vec::new();
        for path in changed {
            let abs = self.config.repo_root.join(path);
            let content = match std::fs::read_to_string(&abs) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "unreadable file skipped by embedder");
                    continue;
                }
            };
            let symbols = self.symbols.list_defs_in_file(&self.repo_key, path).await?;
            let chunks = chunker::chunk_file(path, &content, &symbols, &self.config.chunking);
            self.embeddings
                .prune_path(&self.repo_key, path, &chunks, &model)
                .await?;
            for chunk in chunks {
                if self
                    .embeddings
                    .has_embedding(&self.repo_key, &chunk, &model)
                    .await?
                {
                    outcome.chunks_skipped += 1;
                } else {
                    jobs.push(chunk);
                }
            }
        }

        if jobs.is_empty() {
            return Ok(());
        }

        let (embedded, failures) = self.embed_chunks(jobs).await;
        outcome.embed_failures += failures;

        if !embedded.is_empty() {
            outcome.chunks_embedded += self
                .embeddings
                .save_batch(&self.repo_key, &embedded, &model)
                .await?;
        }

        Ok(())
    }

    /// Worker pool: a jobs channel feeding `embedding.workers` tasks,
    /// results accumulated for one `save_batch` at the end.
    ///
    /// Per-chunk failures increment the failure counter and are
    /// logged; they never abort the batch.
    async fn embed_chunks(&self, chunks: Vec<Chunk>) -> (Vec<(Chunk, Vec<f32>)>, usize) {
        let worker_count = self.config.embedding.workers.max(1).min(chunks.len());
        let capacity = chunks.len().max(1);
        let (job_tx, job_rx) = mpsc::channel::<Chunk>(capacity);
        let (result_tx, mut result_rx) = mpsc::channel::<(Chunk, Vec<f32>)>(capacity);
        let job_rx = Arc::new(tokio::sync::Mutex::new(job_rx));
        let failures = Arc::new(AtomicUsize::new(0));

        let mut workers = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let embedder = self.embedder.clone();
            let failures = failures.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    let job = { job_rx.lock().await.recv().await };
                    let Some(chunk) = job else { break };
                    match embedder.embed(&[chunk.content.clone()]).await {
                        Ok(mut vectors) if !vectors.is_empty() => {
                            let vector = vectors.remove(0);
                            if result_tx.send((chunk, vector)).await.is_err() {
                                break;
                            }
                        }
                        Ok(_) => {
                            failures.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            failures.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(
                                path = %chunk.path,
                                start = chunk.start_line,
                                error = %e,
                                "chunk embedding failed, skipping"
                            );
                        }
                    }
                }
            }));
        }
        drop(result_tx);

        for chunk in chunks {
            if job_tx.send(chunk).await.is_err() {
                break;
            }
        }
        drop(job_tx);

        let mut results = Vec::new();
        while let Some(result) = result_rx.recv().await {
            results.push(result);
        }
        for worker in workers {
            let _ = worker.await;
        }

        (results, failures.load(Ordering::Relaxed))
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    /// Ranked fuzzy symbol lookup.
    pub async fn find_symbol(
        &self,
        name: &str,
        kind: Option<&str>,
        limit: usize,
    ) -> CodetectResult<Vec<Symbol>> {
        self.symbols.find_symbol(&self.repo_key, name, kind, limit).await
    }

    /// All symbols in one file, ordered by line.
    pub async fn list_defs_in_file(&self, path: &str) -> CodetectResult<Vec<Symbol>> {
        self.symbols.list_defs_in_file(&self.repo_key, path).await
    }

    /// Semantic search scoped to this project.
    pub async fn search_semantic(
        &self,
        query: &str,
        top_k: usize,
    ) -> CodetectResult<SemanticSearchResponse> {
        let roots = [self.repo_key.clone()];
        self.searcher
            .search(&roots, query, top_k, &self.snippet_fn())
            .await
    }

    /// Regex keyword scan scoped to this project.
    pub fn search_keyword(&self, query: &str, top_k: usize) -> CodetectResult<Vec<KeywordHit>> {
        keyword::scan(&self.config.repo_root, query, top_k)
    }

    /// Read a file (or a 1-indexed inclusive line range of it).
    pub fn get_file(
        &self,
        path: &str,
        start: Option<u32>,
        end: Option<u32>,
    ) -> CodetectResult<String> {
        if std::path::Path::new(path).is_absolute()
            || path.split('/').any(|part| part == "..")
        {
            return Err(CodetectError::NotFound {
                entity: format!("file {path}"),
            });
        }
        let content = std::fs::read_to_string(self.config.repo_root.join(path))
            .map_err(|_| CodetectError::NotFound {
                entity: format!("file {path}"),
            })?;

        match (start, end) {
            (None, None) => Ok(content),
            (start, end) => {
                let lines: Vec<&str> = content.lines().collect();
                let s = start.unwrap_or(1).max(1) as usize;
                let e = end.map(|e| e as usize).unwrap_or(lines.len()).min(lines.len());
                if s > e || s > lines.len() {
                    return Ok(String::new());
                }
                Ok(lines[s - 1..e].join("\n"))
            }
        }
    }

    /// Symbol-store counts for this project.
    pub async fn stats(&self) -> CodetectResult<IndexStats> {
        self.symbols.stats(&self.repo_key).await
    }

    /// Registry-shaped statistics (symbols, embeddings, db size).
    pub async fn project_stats(&self) -> CodetectResult<ProjectStats> {
        let stats = self.stats().await?;
        let embeddings = self.embeddings.count(&self.repo_key).await?;
        let db_size_bytes = std::fs::metadata(
            self.config.database.resolved_path(&self.config.repo_root),
        )
        .map(|m| m.len())
        .unwrap_or(0);
        Ok(ProjectStats {
            symbols: stats.symbol_count,
            embeddings,
            db_size_bytes,
        })
    }

    /// Full status for the status tool and the CLI.
    pub async fn status(&self) -> CodetectResult<EngineStatus> {
        let stats = self.stats().await?;
        let embeddings = self.embeddings.count(&self.repo_key).await?;
        Ok(EngineStatus {
            repo_root: self.repo_key.clone(),
            engine: match self.db.dialect() {
                crate::storage::Dialect::Sqlite => "sqlite".into(),
                crate::storage::Dialect::Postgres => "postgres".into(),
            },
            files_indexed: stats.file_count,
            symbols_indexed: stats.symbol_count,
            embeddings_stored: embeddings,
            embedder: self.embedder.provider_id(),
            embedder_available: self.embedder.is_available(),
            dimensions: self.embedder.dimensions(),
        })
    }

    /// Code-excerpt provider for the searcher, reading project files.
    fn snippet_fn(&self) -> Box<SnippetFn> {
        let root = self.config.repo_root.clone();
        Box::new(move |path, start, end| {
            let content = std::fs::read_to_string(root.join(path)).ok()?;
            let lines: Vec<&str> = content.lines().collect();
            let s = start.max(1) as usize;
            if lines.is_empty() || s > lines.len() {
                return None;
            }
            let e = (end as usize).min(lines.len());
            Some(lines[s - 1..e].join("\n"))
        })
    }
}

/// Result of one index pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexOutcome {
    /// Files whose symbols were (re)written.
    pub files_indexed: usize,
    /// Files removed from the index.
    pub files_removed: usize,
    /// Files the extractor refused.
    pub files_failed: usize,
    /// Symbol rows written.
    pub symbols_written: usize,
    /// Chunks embedded this pass.
    pub chunks_embedded: usize,
    /// Chunks skipped because their hash and coordinates were already
    /// stored.
    pub chunks_skipped: usize,
    /// Chunks whose embedding failed; they retry next pass.
    pub embed_failures: usize,
}

/// Status information about one engine.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    /// Repository path being served.
    pub repo_root: String,
    /// Storage engine in use.
    pub engine: String,
    /// Files in the symbol index.
    pub files_indexed: usize,
    /// Symbols in the symbol index.
    pub symbols_indexed: usize,
    /// Embedding rows stored.
    pub embeddings_stored: usize,
    /// Provider token of the configured embedder.
    pub embedder: String,
    /// Whether semantic search is serving.
    pub embedder_available: bool,
    /// Configured vector length.
    pub dimensions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DbEngine, EmbeddingProviderKind};
    use crate::embedder::StaticEmbedder;
    use crate::symbols::extract::TreeSitterExtractor;
    use async_trait::async_trait;
    use std::path::Path;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("mkdir");
        }
        std::fs::write(path, content).expect("write");
    }

    async fn test_engine(repo: &Path, state: &Path) -> Engine {
        let mut config = Config::defaults(repo);
        config.database.engine = DbEngine::Sqlite;
        config.database.path = Some(state.join("symbols.db"));
        config.embedding.provider = EmbeddingProviderKind::Off;
        config.embedding.workers = 2;

        let db = Arc::new(Database::open_sqlite(&state.join("symbols.db")).expect("db"));
        Engine::with_components(
            config,
            db,
            Arc::new(StaticEmbedder::new(32)),
            Box::new(TreeSitterExtractor::new()),
        )
        .await
        .expect("engine")
    }

    /// A multi-line Rust function so the chunker has something above
    /// the minimum chunk size.
    fn long_fn(name: &str) -> String {
        format!(
            "pub fn {name}() {{\n    let a = 1;\n    let b = 2;\n    let c = 3;\n    let d = 4;\n    let e = a + b + c + d;\n    drop(e);\n}}\n"
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_index_extracts_symbols_and_embeds_chunks() {
        let repo = tempfile::tempdir().expect("repo");
        let state = tempfile::tempdir().expect("state");
        write(repo.path(), "main.rs", &long_fn("hello"));

        let engine = test_engine(repo.path(), state.path()).await;
        let outcome = engine.index().await.expect("index");

        assert_eq!(outcome.files_indexed, 1);
        assert!(outcome.symbols_written >= 1);
        assert!(outcome.chunks_embedded >= 1);
        assert_eq!(outcome.embed_failures, 0);

        let status = engine.status().await.expect("status");
        assert_eq!(status.files_indexed, 1);
        assert!(status.embeddings_stored >= 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reindex_skips_unchanged_chunks() {
        let repo = tempfile::tempdir().expect("repo");
        let state = tempfile::tempdir().expect("state");
        write(repo.path(), "main.rs", &long_fn("hello"));

        let engine = test_engine(repo.path(), state.path()).await;
        let first = engine.index().await.expect("first");
        assert!(first.chunks_embedded >= 1);

        let second = engine.index().await.expect("second");
        // Unchanged file: no symbol work, no chunk work at all.
        assert_eq!(second.files_indexed, 0);
        assert_eq!(second.chunks_embedded, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_incremental_symbol_delta() {
        let repo = tempfile::tempdir().expect("repo");
        let state = tempfile::tempdir().expect("state");
        write(repo.path(), "main.rs", &long_fn("one"));

        let engine = test_engine(repo.path(), state.path()).await;
        engine.index().await.expect("first");
        let before = engine.stats().await.expect("stats");

        std::thread::sleep(std::time::Duration::from_millis(5));
        write(
            repo.path(),
            "main.rs",
            &format!("{}{}", long_fn("one"), long_fn("two")),
        );
        engine.index().await.expect("second");
        let after = engine.stats().await.expect("stats");

        assert_eq!(after.symbol_count, before.symbol_count + 1);
        assert_eq!(after.file_count, before.file_count);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_semantic_search_end_to_end() {
        let repo = tempfile::tempdir().expect("repo");
        let state = tempfile::tempdir().expect("state");
        write(
            repo.path(),
            "auth.rs",
            "pub fn validate_token(token: &str) -> bool {\n    let trimmed = token.trim();\n    let checked = !trimmed.is_empty();\n    let expiry = trimmed.len() > 8;\n    checked && expiry\n}\n",
        );
        write(
            repo.path(),
            "render.rs",
            "pub fn render_template(page: &str) -> String {\n    let mut html = String::new();\n    html.push_str(page);\n    html.push_str(\"</html>\");\n    html\n}\n",
        );

        let engine = test_engine(repo.path(), state.path()).await;
        engine.index().await.expect("index");

        let response = engine
            .search_semantic("validate token", 5)
            .await
            .expect("search");
        assert!(response.available);
        assert!(!response.results.is_empty());
        assert_eq!(response.results[0].path, "auth.rs");
        assert!(!response.results[0].snippet.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_deleted_file_drops_embeddings() {
        let repo = tempfile::tempdir().expect("repo");
        let state = tempfile::tempdir().expect("state");
        write(repo.path(), "gone.rs", &long_fn("gone"));

        let engine = test_engine(repo.path(), state.path()).await;
        engine.index().await.expect("first");
        assert!(engine.status().await.expect("status").embeddings_stored >= 1);

        std::fs::remove_file(repo.path().join("gone.rs")).expect("rm");
        engine.index().await.expect("second");

        let status = engine.status().await.expect("status");
        assert_eq!(status.files_indexed, 0);
        assert_eq!(status.embeddings_stored, 0);
    }

    /// Embedder that refuses chunks containing a marker token.
    struct FailingEmbedder {
        inner: StaticEmbedder,
    }

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, texts: &[String]) -> CodetectResult<Vec<Vec<f32>>> {
            if texts.iter().any(|t| t.contains("poison")) {
                return Err(CodetectError::Embed {
                    message: "poisoned chunk".into(),
                });
            }
            self.inner.embed(texts).await
        }
        fn is_available(&self) -> bool {
            true
        }
        fn provider_id(&self) -> String {
            "static:failing".into()
        }
        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_per_chunk_embed_failure_is_isolated() {
        let repo = tempfile::tempdir().expect("repo");
        let state = tempfile::tempdir().expect("state");
        write(repo.path(), "good.rs", &long_fn("good"));
        write(repo.path(), "bad.rs", &long_fn("poison"));

        let mut config = Config::defaults(repo.path());
        config.database.path = Some(state.path().join("symbols.db"));
        config.embedding.workers = 2;
        let db = Arc::new(Database::open_sqlite(&state.path().join("symbols.db")).expect("db"));
        let engine = Engine::with_components(
            config,
            db,
            Arc::new(FailingEmbedder {
                inner: StaticEmbedder::new(32),
            }),
            Box::new(TreeSitterExtractor::new()),
        )
        .await
        .expect("engine");

        let outcome = engine.index().await.expect("index");
        assert!(outcome.chunks_embedded >= 1, "good chunks still embed");
        assert!(outcome.embed_failures >= 1, "poisoned chunk counted");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_get_file_ranges_and_traversal_guard() {
        let repo = tempfile::tempdir().expect("repo");
        let state = tempfile::tempdir().expect("state");
        write(repo.path(), "f.rs", "one\ntwo\nthree\nfour\n");

        let engine = test_engine(repo.path(), state.path()).await;

        assert_eq!(engine.get_file("f.rs", None, None).expect("all"), "one\ntwo\nthree\nfour\n");
        assert_eq!(engine.get_file("f.rs", Some(2), Some(3)).expect("range"), "two\nthree");
        assert!(engine.get_file("../outside.rs", None, None).is_err());
        assert!(engine.get_file("/etc/passwd", None, None).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_full_reindex_matches_incremental_state() {
        let repo = tempfile::tempdir().expect("repo");
        let state = tempfile::tempdir().expect("state");
        write(repo.path(), "a.rs", &long_fn("alpha"));
        write(repo.path(), "b.rs", &long_fn("beta"));

        let engine = test_engine(repo.path(), state.path()).await;
        engine.index().await.expect("incremental");
        let incremental = engine.stats().await.expect("stats");

        let outcome = engine.full_reindex().await.expect("full");
        assert_eq!(outcome.files_indexed, 2);
        let full = engine.stats().await.expect("stats");
        assert_eq!(incremental, full);
    }
}
