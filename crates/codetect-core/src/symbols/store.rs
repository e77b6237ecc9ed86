//! Symbol store: schema, incremental indexing, and symbol queries.
//!
//! Two tables per installation (`files`, `symbols`) plus a version
//! row. Every query is scoped by `repo_root`; forgetting that clause
//! anywhere in this file is a cross-repo leak and a defect.
//!
//! ## Incremental indexing
//!
//! One transaction per batch, not per file: readers never observe a
//! half-indexed repository, and editor save storms don't contend on
//! per-file commits. Within the transaction each changed file's
//! symbol rows are deleted before the new set is inserted, which
//! tolerates any symbol reordering inside the file.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use crate::error::{CodetectError, CodetectResult};
use crate::storage::{Database, SqlRow, SqlValue, Statement};
use crate::symbols::extract::SymbolExtractor;
use crate::symbols::scan::{scan_project, ScannedFile};
use crate::types::{now_secs, IndexStats, Symbol};

/// Highest schema version this build understands.
pub const SCHEMA_VERSION: i64 = 1;

/// Files that need work, and files that vanished from disk.
#[derive(Debug, Default)]
pub struct ChangeSet {
    /// New files and files whose `(mtime_ns, size)` changed.
    pub changed: Vec<ScannedFile>,
    /// Recorded paths no longer present on disk.
    pub removed: Vec<String>,
}

impl ChangeSet {
    /// Whether there is nothing to do.
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Outcome of one incremental index pass.
#[derive(Debug, Default)]
pub struct UpdateSummary {
    /// Files whose symbols were (re)written.
    pub files_indexed: usize,
    /// Files removed from the index.
    pub files_removed: usize,
    /// Files the extractor refused; they retry next pass.
    pub files_failed: usize,
    /// Symbol rows written.
    pub symbols_written: usize,
    /// Relative paths that changed, for the embedding pipeline.
    pub changed_paths: Vec<String>,
    /// Relative paths that were removed, for the embedding pipeline.
    pub removed_paths: Vec<String>,
}

/// Store for file records and symbols.
pub struct SymbolStore {
    db: Arc<Database>,
}

impl SymbolStore {
    /// Open the store, creating or validating the schema.
    pub async fn open(db: Arc<Database>) -> CodetectResult<Self> {
        let store = Self { db };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> CodetectResult<()> {
        let dialect = self.db.dialect();
        let bigint = dialect.bigint_type();

        self.db
            .exec(
                &dialect.create_table(
                    "files",
                    &[
                        "repo_root TEXT NOT NULL".into(),
                        "path TEXT NOT NULL".into(),
                        format!("mtime_ns {bigint} NOT NULL"),
                        format!("size {bigint} NOT NULL"),
                        format!("indexed_at {bigint} NOT NULL"),
                        "PRIMARY KEY (repo_root, path)".into(),
                    ],
                ),
                &[],
            )
            .await?;

        self.db
            .exec(
                &dialect.create_table(
                    "symbols",
                    &[
                        format!("id {}", dialect.auto_pk()),
                        "repo_root TEXT NOT NULL".into(),
                        "name TEXT NOT NULL".into(),
                        "kind TEXT NOT NULL".into(),
                        "path TEXT NOT NULL".into(),
                        format!("line {bigint} NOT NULL"),
                        "language TEXT".into(),
                        "pattern TEXT".into(),
                        "scope TEXT".into(),
                        "signature TEXT".into(),
                    ],
                ),
                &[],
            )
            .await?;

        for ddl in [
            dialect.create_index(
                "uq_symbols_ident",
                "symbols",
                &["repo_root", "name", "path", "line"],
                true,
            ),
            dialect.create_index("idx_symbols_repo_name", "symbols", &["repo_root", "name"], false),
            dialect.create_index("idx_symbols_repo_path", "symbols", &["repo_root", "path"], false),
        ] {
            self.db.exec(&ddl, &[]).await?;
        }

        self.db
            .exec(
                &dialect.create_table(
                    "schema_meta",
                    &[format!("version {bigint} NOT NULL")],
                ),
                &[],
            )
            .await?;

        match self
            .db
            .query_row("SELECT version FROM schema_meta", &[])
            .await?
        {
            None => {
                self.db
                    .exec(
                        "INSERT INTO schema_meta (version) VALUES (?)",
                        &[SqlValue::from(SCHEMA_VERSION)],
                    )
                    .await?;
            }
            Some(row) => {
                let found = row.get_i64(0)?;
                if found > SCHEMA_VERSION {
                    return Err(CodetectError::SchemaVersion {
                        found,
                        supported: SCHEMA_VERSION,
                    });
                }
                // Older versions would migrate here; version 1 is the
                // first published schema.
            }
        }

        Ok(())
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    /// Fuzzy symbol lookup, exact and prefix matches first.
    ///
    /// Ranking: exact name match 0, prefix match 1, other substring
    /// match 2; ties break on ascending name.
    pub async fn find_symbol(
        &self,
        repo_root: &str,
        name_pattern: &str,
        kind: Option<&str>,
        limit: usize,
    ) -> CodetectResult<Vec<Symbol>> {
        let contains = self.db.dialect().contains_predicate("name");
        let kind_clause = if kind.is_some() { " AND kind = ?" } else { "" };
        let sql = format!(
            "SELECT name, kind, path, line, language, pattern, scope, signature \
             FROM symbols \
             WHERE repo_root = ? AND {contains}{kind_clause} \
             ORDER BY CASE WHEN name = ? THEN 0 \
                           WHEN substr(name, 1, length(?)) = ? THEN 1 \
                           ELSE 2 END, \
                      name ASC \
             LIMIT ?"
        );

        let mut params: Vec<SqlValue> = vec![
            SqlValue::from(repo_root),
            SqlValue::from(name_pattern),
        ];
        if let Some(k) = kind {
            params.push(SqlValue::from(k));
        }
        params.push(SqlValue::from(name_pattern));
        params.push(SqlValue::from(name_pattern));
        params.push(SqlValue::from(name_pattern));
        params.push(SqlValue::from(limit));

        let rows = self.db.query(&sql, &params).await?;
        rows.iter().map(|r| row_to_symbol(repo_root, r)).collect()
    }

    /// All symbols in one file, ordered by line.
    pub async fn list_defs_in_file(
        &self,
        repo_root: &str,
        path: &str,
    ) -> CodetectResult<Vec<Symbol>> {
        let rows = self
            .db
            .query(
                "SELECT name, kind, path, line, language, pattern, scope, signature \
                 FROM symbols WHERE repo_root = ? AND path = ? ORDER BY line ASC",
                &[SqlValue::from(repo_root), SqlValue::from(path)],
            )
            .await?;
        rows.iter().map(|r| row_to_symbol(repo_root, r)).collect()
    }

    /// Symbol and file counts for one project.
    pub async fn stats(&self, repo_root: &str) -> CodetectResult<IndexStats> {
        let symbols = self
            .db
            .query_row(
                "SELECT COUNT(*) FROM symbols WHERE repo_root = ?",
                &[SqlValue::from(repo_root)],
            )
            .await?
            .map(|r| r.get_i64(0))
            .transpose()?
            .unwrap_or(0);
        let files = self
            .db
            .query_row(
                "SELECT COUNT(*) FROM files WHERE repo_root = ?",
                &[SqlValue::from(repo_root)],
            )
            .await?
            .map(|r| r.get_i64(0))
            .transpose()?
            .unwrap_or(0);
        Ok(IndexStats {
            symbol_count: symbols as usize,
            file_count: files as usize,
        })
    }

    // -----------------------------------------------------------------
    // Incremental indexing
    // -----------------------------------------------------------------

    /// Walk the project and join against recorded file state.
    pub async fn compute_change_set(&self, repo_root: &Path) -> CodetectResult<ChangeSet> {
        let repo_key = repo_root.to_string_lossy().to_string();
        let scanned = scan_project(repo_root)?;

        let rows = self
            .db
            .query(
                "SELECT path, mtime_ns, size FROM files WHERE repo_root = ?",
                &[SqlValue::from(repo_key)],
            )
            .await?;
        let mut recorded: HashMap<String, (i64, i64)> = HashMap::with_capacity(rows.len());
        for row in &rows {
            recorded.insert(row.get_string(0)?, (row.get_i64(1)?, row.get_i64(2)?));
        }

        let seen: HashSet<&str> = scanned.iter().map(|f| f.path.as_str()).collect();
        let removed: Vec<String> = recorded
            .keys()
            .filter(|path| !seen.contains(path.as_str()))
            .cloned()
            .collect();

        let changed: Vec<ScannedFile> = scanned
            .into_iter()
            .filter(|f| recorded.get(&f.path) != Some(&(f.mtime_ns, f.size)))
            .collect();

        Ok(ChangeSet { changed, removed })
    }

    /// Incremental index pass: extract changed files and apply the
    /// whole batch in one transaction.
    ///
    /// Extractor failures on a single file are logged and skipped; the
    /// transaction still commits for the other files. Removal of
    /// vanished files is eager and rides in the same transaction.
    pub async fn update(
        &self,
        repo_root: &Path,
        extractor: &dyn SymbolExtractor,
    ) -> CodetectResult<UpdateSummary> {
        let changes = self.compute_change_set(repo_root).await?;
        self.apply_changes(repo_root, changes, extractor).await
    }

    /// Drop all rows for the repo and re-index from scratch.
    pub async fn full_reindex(
        &self,
        repo_root: &Path,
        extractor: &dyn SymbolExtractor,
    ) -> CodetectResult<UpdateSummary> {
        let repo_key = repo_root.to_string_lossy().to_string();
        self.db
            .exec_batch(&[
                Statement::new(
                    "DELETE FROM symbols WHERE repo_root = ?",
                    vec![SqlValue::from(repo_key.clone())],
                ),
                Statement::new(
                    "DELETE FROM files WHERE repo_root = ?",
                    vec![SqlValue::from(repo_key)],
                ),
            ])
            .await?;
        self.update(repo_root, extractor).await
    }

    async fn apply_changes(
        &self,
        repo_root: &Path,
        changes: ChangeSet,
        extractor: &dyn SymbolExtractor,
    ) -> CodetectResult<UpdateSummary> {
        let repo_key = repo_root.to_string_lossy().to_string();
        let mut summary = UpdateSummary::default();
        if changes.is_empty() {
            return Ok(summary);
        }

        let extracted = extractor.extract(repo_root, &changes.changed).await?;

        let dialect = self.db.dialect();
        let file_upsert = dialect.upsert(
            "files",
            &["repo_root", "path", "mtime_ns", "size", "indexed_at"],
            &["repo_root", "path"],
        );
        let symbol_upsert = dialect.upsert(
            "symbols",
            &[
                "repo_root",
                "name",
                "kind",
                "path",
                "line",
                "language",
                "pattern",
                "scope",
                "signature",
            ],
            &["repo_root", "name", "path", "line"],
        );

        let indexed_at = now_secs();
        let mut statements = Vec::new();

        for file in &changes.changed {
            let Some(symbols) = extracted.get(&file.path) else {
                // Extractor refused this file; keep the old rows and
                // retry on the next pass.
                tracing::warn!(path = %file.path, "extractor skipped file");
                summary.files_failed += 1;
                continue;
            };

            statements.push(Statement::new(
                "DELETE FROM symbols WHERE repo_root = ? AND path = ?",
                vec![SqlValue::from(repo_key.clone()), SqlValue::from(file.path.clone())],
            ));
            for symbol in symbols {
                statements.push(Statement::new(
                    symbol_upsert.clone(),
                    vec![
                        SqlValue::from(repo_key.clone()),
                        SqlValue::from(symbol.name.clone()),
                        SqlValue::from(symbol.kind.clone()),
                        SqlValue::from(file.path.clone()),
                        SqlValue::from(symbol.line),
                        SqlValue::from(symbol.language.clone()),
                        SqlValue::from(symbol.pattern.clone()),
                        SqlValue::from(symbol.scope.clone()),
                        SqlValue::from(symbol.signature.clone()),
                    ],
                ));
                summary.symbols_written += 1;
            }
            statements.push(Statement::new(
                file_upsert.clone(),
                vec![
                    SqlValue::from(repo_key.clone()),
                    SqlValue::from(file.path.clone()),
                    SqlValue::from(file.mtime_ns),
                    SqlValue::from(file.size),
                    SqlValue::from(indexed_at),
                ],
            ));
            summary.files_indexed += 1;
            summary.changed_paths.push(file.path.clone());
        }

        for path in &changes.removed {
            statements.push(Statement::new(
                "DELETE FROM symbols WHERE repo_root = ? AND path = ?",
                vec![SqlValue::from(repo_key.clone()), SqlValue::from(path.clone())],
            ));
            statements.push(Statement::new(
                "DELETE FROM files WHERE repo_root = ? AND path = ?",
                vec![SqlValue::from(repo_key.clone()), SqlValue::from(path.clone())],
            ));
            summary.files_removed += 1;
            summary.removed_paths.push(path.clone());
        }

        self.db.exec_batch(&statements).await?;

        tracing::debug!(
            repo = %repo_key,
            indexed = summary.files_indexed,
            removed = summary.files_removed,
            failed = summary.files_failed,
            symbols = summary.symbols_written,
            "symbol index pass applied"
        );

        Ok(summary)
    }
}

fn row_to_symbol(repo_root: &str, row: &SqlRow) -> CodetectResult<Symbol> {
    Ok(Symbol {
        repo_root: repo_root.to_string(),
        name: row.get_string(0)?,
        kind: row.get_string(1)?,
        path: row.get_string(2)?,
        line: row.get_i64(3)? as u32,
        language: row.get_opt_string(4)?,
        pattern: row.get_opt_string(5)?,
        scope: row.get_opt_string(6)?,
        signature: row.get_opt_string(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::extract::StaticExtractor;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("mkdir");
        }
        std::fs::write(path, content).expect("write");
    }

    async fn open_store(dir: &tempfile::TempDir) -> SymbolStore {
        let db = Database::open_sqlite(&dir.path().join("symbols.db")).expect("open db");
        SymbolStore::open(Arc::new(db)).await.expect("open store")
    }

    fn symbol(name: &str, kind: &str, line: u32) -> Symbol {
        Symbol {
            repo_root: String::new(),
            name: name.into(),
            kind: kind.into(),
            path: String::new(),
            line,
            language: Some("rust".into()),
            pattern: None,
            scope: None,
            signature: None,
        }
    }

    #[tokio::test]
    async fn test_update_indexes_new_files() {
        let state = tempfile::tempdir().expect("state");
        let repo = tempfile::tempdir().expect("repo");
        write(repo.path(), "main.rs", "fn hello() {}\nfn world() {}\n");

        let store = open_store(&state).await;
        let extractor = StaticExtractor::with_symbols(vec![
            ("main.rs", symbol("hello", "function", 1)),
            ("main.rs", symbol("world", "function", 2)),
        ]);

        let summary = store.update(repo.path(), &extractor).await.expect("update");
        assert_eq!(summary.files_indexed, 1);
        assert_eq!(summary.symbols_written, 2);

        let repo_key = repo.path().to_string_lossy().to_string();
        let stats = store.stats(&repo_key).await.expect("stats");
        assert_eq!(stats.file_count, 1);
        assert_eq!(stats.symbol_count, 2);
    }

    #[tokio::test]
    async fn test_update_is_idempotent() {
        let state = tempfile::tempdir().expect("state");
        let repo = tempfile::tempdir().expect("repo");
        write(repo.path(), "main.rs", "fn hello() {}\n");

        let store = open_store(&state).await;
        let extractor =
            StaticExtractor::with_symbols(vec![("main.rs", symbol("hello", "function", 1))]);

        store.update(repo.path(), &extractor).await.expect("first");
        let second = store.update(repo.path(), &extractor).await.expect("second");
        // Unchanged file: nothing to do at all.
        assert_eq!(second.files_indexed, 0);

        let repo_key = repo.path().to_string_lossy().to_string();
        let stats = store.stats(&repo_key).await.expect("stats");
        assert_eq!(stats.symbol_count, 1);
    }

    #[tokio::test]
    async fn test_modified_file_replaces_symbols_without_orphans() {
        let state = tempfile::tempdir().expect("state");
        let repo = tempfile::tempdir().expect("repo");
        write(repo.path(), "main.rs", "fn one() {}\n");

        let store = open_store(&state).await;
        let extractor =
            StaticExtractor::with_symbols(vec![("main.rs", symbol("one", "function", 1))]);
        store.update(repo.path(), &extractor).await.expect("first");

        // Modify the file; the extractor now reports two different symbols.
        std::thread::sleep(std::time::Duration::from_millis(5));
        write(repo.path(), "main.rs", "fn two() {}\nfn three() {}\n");
        let extractor = StaticExtractor::with_symbols(vec![
            ("main.rs", symbol("two", "function", 1)),
            ("main.rs", symbol("three", "function", 2)),
        ]);
        store.update(repo.path(), &extractor).await.expect("second");

        let repo_key = repo.path().to_string_lossy().to_string();
        let stats = store.stats(&repo_key).await.expect("stats");
        assert_eq!(stats.symbol_count, 2, "old rows must be replaced");

        let orphans = store
            .find_symbol(&repo_key, "one", None, 10)
            .await
            .expect("find");
        assert!(orphans.is_empty(), "no orphan from the first version");
    }

    #[tokio::test]
    async fn test_removed_file_is_deleted_eagerly() {
        let state = tempfile::tempdir().expect("state");
        let repo = tempfile::tempdir().expect("repo");
        write(repo.path(), "gone.rs", "fn gone() {}\n");

        let store = open_store(&state).await;
        let extractor =
            StaticExtractor::with_symbols(vec![("gone.rs", symbol("gone", "function", 1))]);
        store.update(repo.path(), &extractor).await.expect("first");

        std::fs::remove_file(repo.path().join("gone.rs")).expect("rm");
        let summary = store
            .update(repo.path(), &StaticExtractor::empty())
            .await
            .expect("second");
        assert_eq!(summary.files_removed, 1);

        let repo_key = repo.path().to_string_lossy().to_string();
        let stats = store.stats(&repo_key).await.expect("stats");
        assert_eq!(stats.file_count, 0);
        assert_eq!(stats.symbol_count, 0);
    }

    #[tokio::test]
    async fn test_repo_isolation() {
        let state = tempfile::tempdir().expect("state");
        let repo_a = tempfile::tempdir().expect("repo a");
        let repo_b = tempfile::tempdir().expect("repo b");
        // Identical relative paths and contents in both repos.
        write(repo_a.path(), "main.go", "package m\nfunc hello() {}\n");
        write(repo_b.path(), "main.go", "package m\nfunc hello() {}\n");

        let store = open_store(&state).await;
        let extractor =
            StaticExtractor::with_symbols(vec![("main.go", symbol("hello", "function", 2))]);
        store.update(repo_a.path(), &extractor).await.expect("a");
        store.update(repo_b.path(), &extractor).await.expect("b");

        let key_a = repo_a.path().to_string_lossy().to_string();
        let key_b = repo_b.path().to_string_lossy().to_string();

        let stats_a = store.stats(&key_a).await.expect("stats a");
        let stats_b = store.stats(&key_b).await.expect("stats b");
        assert_eq!(stats_a, stats_b);
        assert_eq!(stats_a.file_count, 1);
        assert!(stats_a.symbol_count >= 1);

        let hits = store.find_symbol(&key_a, "hello", None, 10).await.expect("find");
        assert!(hits.iter().all(|s| s.repo_root == key_a));
        assert_eq!(hits.len(), 1, "query scoped to A must not see B's row");
    }

    #[tokio::test]
    async fn test_find_symbol_prefix_ranking() {
        let state = tempfile::tempdir().expect("state");
        let repo = tempfile::tempdir().expect("repo");
        write(repo.path(), "srv.rs", "struct Server;\nstruct ServerPool;\nstruct MyServer;\n");

        let store = open_store(&state).await;
        let extractor = StaticExtractor::with_symbols(vec![
            ("srv.rs", symbol("Server", "struct", 1)),
            ("srv.rs", symbol("ServerPool", "struct", 2)),
            ("srv.rs", symbol("MyServer", "struct", 3)),
        ]);
        store.update(repo.path(), &extractor).await.expect("update");

        let repo_key = repo.path().to_string_lossy().to_string();
        let hits = store.find_symbol(&repo_key, "Serv", None, 10).await.expect("find");
        let names: Vec<_> = hits.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Server", "ServerPool", "MyServer"]);

        // Exact match always ranks first.
        let hits = store.find_symbol(&repo_key, "Server", None, 10).await.expect("find");
        assert_eq!(hits[0].name, "Server");
    }

    #[tokio::test]
    async fn test_find_symbol_kind_filter_and_limit() {
        let state = tempfile::tempdir().expect("state");
        let repo = tempfile::tempdir().expect("repo");
        write(repo.path(), "m.rs", "fn load() {}\nstruct Loader;\n");

        let store = open_store(&state).await;
        let extractor = StaticExtractor::with_symbols(vec![
            ("m.rs", symbol("load", "function", 1)),
            ("m.rs", symbol("Loader", "struct", 2)),
        ]);
        store.update(repo.path(), &extractor).await.expect("update");

        let repo_key = repo.path().to_string_lossy().to_string();
        let structs = store
            .find_symbol(&repo_key, "Load", Some("struct"), 10)
            .await
            .expect("find");
        assert_eq!(structs.len(), 1);
        assert_eq!(structs[0].name, "Loader");

        let limited = store.find_symbol(&repo_key, "oad", None, 1).await.expect("find");
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_list_defs_in_file_ordered_by_line() {
        let state = tempfile::tempdir().expect("state");
        let repo = tempfile::tempdir().expect("repo");
        write(repo.path(), "m.py", "def b(): pass\ndef a(): pass\n");

        let store = open_store(&state).await;
        let extractor = StaticExtractor::with_symbols(vec![
            ("m.py", symbol("a", "function", 2)),
            ("m.py", symbol("b", "function", 1)),
        ]);
        store.update(repo.path(), &extractor).await.expect("update");

        let repo_key = repo.path().to_string_lossy().to_string();
        let defs = store.list_defs_in_file(&repo_key, "m.py").await.expect("defs");
        let names: Vec<_> = defs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_full_reindex_resets_rows() {
        let state = tempfile::tempdir().expect("state");
        let repo = tempfile::tempdir().expect("repo");
        write(repo.path(), "m.rs", "fn f() {}\n");

        let store = open_store(&state).await;
        let extractor =
            StaticExtractor::with_symbols(vec![("m.rs", symbol("f", "function", 1))]);
        store.update(repo.path(), &extractor).await.expect("update");

        let summary = store
            .full_reindex(repo.path(), &extractor)
            .await
            .expect("reindex");
        assert_eq!(summary.files_indexed, 1);

        let repo_key = repo.path().to_string_lossy().to_string();
        let stats = store.stats(&repo_key).await.expect("stats");
        assert_eq!(stats.symbol_count, 1, "reindex must not duplicate rows");
    }

    #[tokio::test]
    async fn test_extractor_failure_is_isolated() {
        let state = tempfile::tempdir().expect("state");
        let repo = tempfile::tempdir().expect("repo");
        write(repo.path(), "good.rs", "fn good() {}\n");
        write(repo.path(), "bad.rs", "fn bad() {}\n");

        let store = open_store(&state).await;
        // The extractor only reports good.rs; bad.rs is treated as refused.
        let extractor =
            StaticExtractor::with_symbols(vec![("good.rs", symbol("good", "function", 1))]);

        let summary = store.update(repo.path(), &extractor).await.expect("update");
        assert_eq!(summary.files_indexed, 1);
        assert_eq!(summary.files_failed, 1);

        let repo_key = repo.path().to_string_lossy().to_string();
        let stats = store.stats(&repo_key).await.expect("stats");
        // The failed file stays out of `files` so the next pass retries it.
        assert_eq!(stats.file_count, 1);
    }
}
