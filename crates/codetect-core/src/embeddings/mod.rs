//! Embedding cache and store.
//!
//! Vectors live in dimension-grouped tables: `embeddings_<N>` on the
//! networked engine (one physical table per vector length, native
//! `VECTOR(N)` column), and one `embeddings` table with JSON-text
//! vectors on the embedded engine. A `repo_embedding_configs` row
//! records which model and dimension group each project occupies; it
//! is how dimension transitions are detected and serviced.
//!
//! Every read, write, and delete here clauses on `repo_root`. A query
//! missing that predicate is a cross-repo leak and a defect.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::config::DbEngine;
use crate::error::{CodetectError, CodetectResult};
use crate::storage::dialect::HnswParams;
use crate::storage::{Database, Dialect, SqlRow, SqlValue, Statement};
use crate::types::{now_secs, Chunk, EmbeddingRecord, RepoEmbeddingConfig};
use crate::vector;

const RECORD_COLUMNS: &str =
    "repo_root, path, start_line, end_line, content_hash, embedding, model, created_at";

/// Store for embedding rows and per-repo embedding configs.
pub struct EmbeddingStore {
    db: Arc<Database>,
    hnsw: HnswParams,
    /// Dimension groups whose tables have been ensured this process.
    ensured: Mutex<HashSet<usize>>,
}

impl EmbeddingStore {
    /// Open the store with the engine's default ANN build parameters.
    pub async fn open(db: Arc<Database>) -> CodetectResult<Self> {
        Self::open_with_hnsw(db, HnswParams::default()).await
    }

    /// Open the store with explicit ANN build parameters.
    pub async fn open_with_hnsw(
        db: Arc<Database>,
        hnsw: HnswParams,
    ) -> CodetectResult<Self> {
        let store = Self {
            db,
            hnsw,
            ensured: Mutex::new(HashSet::new()),
        };
        store.ensure_config_table().await?;
        Ok(store)
    }

    fn engine(&self) -> DbEngine {
        match self.db.dialect() {
            Dialect::Sqlite => DbEngine::Sqlite,
            Dialect::Postgres => DbEngine::Postgres,
        }
    }

    /// Physical table for a dimension group.
    fn table_for(&self, dimensions: usize) -> String {
        match self.engine() {
            DbEngine::Sqlite => "embeddings".to_string(),
            DbEngine::Postgres => format!("embeddings_{dimensions}"),
        }
    }

    async fn ensure_config_table(&self) -> CodetectResult<()> {
        let dialect = self.db.dialect();
        let bigint = dialect.bigint_type();
        self.db
            .exec(
                &dialect.create_table(
                    "repo_embedding_configs",
                    &[
                        "repo_root TEXT PRIMARY KEY".into(),
                        "model TEXT NOT NULL".into(),
                        format!("dimensions {bigint} NOT NULL"),
                        format!("created_at {bigint} NOT NULL"),
                        format!("updated_at {bigint} NOT NULL"),
                    ],
                ),
                &[],
            )
            .await?;
        Ok(())
    }

    async fn ensure_vector_table(&self, dimensions: usize) -> CodetectResult<()> {
        {
            let ensured = self
                .ensured
                .lock()
                .map_err(|_| CodetectError::Internal("ensured-set mutex poisoned".into()))?;
            if ensured.contains(&dimensions) {
                return Ok(());
            }
        }

        let dialect = self.db.dialect();
        let bigint = dialect.bigint_type();
        let table = self.table_for(dimensions);

        self.db
            .exec(
                &dialect.create_table(
                    &table,
                    &[
                        format!("id {}", dialect.auto_pk()),
                        "repo_root TEXT NOT NULL".into(),
                        "path TEXT NOT NULL".into(),
                        format!("start_line {bigint} NOT NULL"),
                        format!("end_line {bigint} NOT NULL"),
                        "content_hash TEXT NOT NULL".into(),
                        format!("embedding {} NOT NULL", dialect.vector_type(dimensions)),
                        "model TEXT NOT NULL".into(),
                        format!("created_at {bigint} NOT NULL"),
                    ],
                ),
                &[],
            )
            .await?;

        for ddl in [
            dialect.create_index(
                &format!("uq_{table}_coord"),
                &table,
                &["repo_root", "path", "start_line", "end_line", "model"],
                true,
            ),
            dialect.create_index(
                &format!("idx_{table}_repo_path"),
                &table,
                &["repo_root", "path"],
                false,
            ),
            dialect.create_index(
                &format!("idx_{table}_hash"),
                &table,
                &["content_hash"],
                false,
            ),
        ] {
            self.db.exec(&ddl, &[]).await?;
        }

        if let Some(ddl) = dialect.create_hnsw_index(
            &format!("hnsw_{table}_embedding"),
            &table,
            "embedding",
            &self.hnsw,
        ) {
            self.db.exec(&ddl, &[]).await?;
        }

        self.ensured
            .lock()
            .map_err(|_| CodetectError::Internal("ensured-set mutex poisoned".into()))?
            .insert(dimensions);
        Ok(())
    }

    // -----------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------

    /// Upsert one embedding.
    pub async fn save(
        &self,
        repo_root: &str,
        chunk: &Chunk,
        vector: &[f32],
        model: &str,
    ) -> CodetectResult<()> {
        self.save_batch(repo_root, &[(chunk.clone(), vector.to_vec())], model)
            .await?;
        Ok(())
    }

    /// Upsert a batch of embeddings in one transaction.
    ///
    /// Enforces the dimension invariant: every vector must have the
    /// repo's configured length, and a repo with no config yet adopts
    /// the batch's length.
    pub async fn save_batch(
        &self,
        repo_root: &str,
        items: &[(Chunk, Vec<f32>)],
        model: &str,
    ) -> CodetectResult<usize> {
        let Some((_, first)) = items.first() else {
            return Ok(0);
        };
        let dimensions = first.len();
        if dimensions == 0 {
            return Err(CodetectError::DimensionMismatch {
                expected: 1,
                actual: 0,
            });
        }
        for (_, vector) in items {
            if vector.len() != dimensions {
                return Err(CodetectError::DimensionMismatch {
                    expected: dimensions,
                    actual: vector.len(),
                });
            }
        }

        match self.get_repo_config(repo_root).await? {
            Some(config) if config.dimensions != dimensions => {
                return Err(CodetectError::DimensionMismatch {
                    expected: config.dimensions,
                    actual: dimensions,
                });
            }
            Some(_) => {}
            None => {
                self.set_repo_config(repo_root, model, dimensions).await?;
            }
        }

        self.ensure_vector_table(dimensions).await?;

        let table = self.table_for(dimensions);
        let upsert = self.db.dialect().upsert(
            &table,
            &[
                "repo_root",
                "path",
                "start_line",
                "end_line",
                "content_hash",
                "embedding",
                "model",
                "created_at",
            ],
            &["repo_root", "path", "start_line", "end_line", "model"],
        );

        let created_at = now_secs();
        let statements: Vec<Statement> = items
            .iter()
            .map(|(chunk, vector)| {
                Statement::new(
                    upsert.clone(),
                    vec![
                        SqlValue::from(repo_root),
                        SqlValue::from(chunk.path.clone()),
                        SqlValue::from(chunk.start_line),
                        SqlValue::from(chunk.end_line),
                        SqlValue::from(chunk.content_hash()),
                        SqlValue::Vector(vector.clone()),
                        SqlValue::from(model),
                        SqlValue::from(created_at),
                    ],
                )
            })
            .collect();

        self.db.exec_batch(&statements).await?;
        Ok(statements.len())
    }

    /// Delete this model's rows for one file that no longer correspond
    /// to a current chunk (same coordinates and content hash).
    ///
    /// Rows belonging to other models are left alone; models coexist
    /// until a dimension migration removes them.
    pub async fn prune_path(
        &self,
        repo_root: &str,
        path: &str,
        keep: &[Chunk],
        model: &str,
    ) -> CodetectResult<u64> {
        let Some(config) = self.get_repo_config(repo_root).await? else {
            return Ok(0);
        };
        let existing = self.get_by_path(repo_root, path).await?;
        let keep_keys: HashSet<(u32, u32, String)> = keep
            .iter()
            .map(|c| (c.start_line, c.end_line, c.content_hash()))
            .collect();

        let table = self.table_for(config.dimensions);
        let statements: Vec<Statement> = existing
            .iter()
            .filter(|row| {
                row.model == model
                    && !keep_keys.contains(&(
                        row.start_line,
                        row.end_line,
                        row.content_hash.clone(),
                    ))
            })
            .map(|row| {
                Statement::new(
                    format!(
                        "DELETE FROM {table} \
                         WHERE repo_root = ? AND path = ? AND start_line = ? \
                           AND end_line = ? AND model = ?"
                    ),
                    vec![
                        SqlValue::from(repo_root),
                        SqlValue::from(path),
                        SqlValue::from(row.start_line),
                        SqlValue::from(row.end_line),
                        SqlValue::from(model),
                    ],
                )
            })
            .collect();

        let pruned = statements.len() as u64;
        if !statements.is_empty() {
            self.db.exec_batch(&statements).await?;
        }
        Ok(pruned)
    }

    /// Delete all embeddings for one file.
    pub async fn delete_by_path(&self, repo_root: &str, path: &str) -> CodetectResult<u64> {
        let Some(config) = self.get_repo_config(repo_root).await? else {
            return Ok(0);
        };
        self.ensure_vector_table(config.dimensions).await?;
        let table = self.table_for(config.dimensions);
        self.db
            .exec(
                &format!("DELETE FROM {table} WHERE repo_root = ? AND path = ?"),
                &[SqlValue::from(repo_root), SqlValue::from(path)],
            )
            .await
    }

    /// Delete all embeddings for one repo.
    pub async fn delete_all(&self, repo_root: &str) -> CodetectResult<u64> {
        let Some(config) = self.get_repo_config(repo_root).await? else {
            return Ok(0);
        };
        self.ensure_vector_table(config.dimensions).await?;
        let table = self.table_for(config.dimensions);
        self.db
            .exec(
                &format!("DELETE FROM {table} WHERE repo_root = ?"),
                &[SqlValue::from(repo_root)],
            )
            .await
    }

    // -----------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------

    /// Existence probe by content hash and exact coordinates; the
    /// indexer uses it to skip re-embedding unchanged chunks.
    pub async fn has_embedding(
        &self,
        repo_root: &str,
        chunk: &Chunk,
        model: &str,
    ) -> CodetectResult<bool> {
        let Some(config) = self.get_repo_config(repo_root).await? else {
            return Ok(false);
        };
        self.ensure_vector_table(config.dimensions).await?;
        let table = self.table_for(config.dimensions);
        let row = self
            .db
            .query_row(
                &format!(
                    "SELECT 1 FROM {table} \
                     WHERE repo_root = ? AND path = ? AND start_line = ? AND end_line = ? \
                       AND model = ? AND content_hash = ? \
                     LIMIT 1"
                ),
                &[
                    SqlValue::from(repo_root),
                    SqlValue::from(chunk.path.clone()),
                    SqlValue::from(chunk.start_line),
                    SqlValue::from(chunk.end_line),
                    SqlValue::from(model),
                    SqlValue::from(chunk.content_hash()),
                ],
            )
            .await?;
        Ok(row.is_some())
    }

    /// All embeddings for one file.
    pub async fn get_by_path(
        &self,
        repo_root: &str,
        path: &str,
    ) -> CodetectResult<Vec<EmbeddingRecord>> {
        let Some(config) = self.get_repo_config(repo_root).await? else {
            return Ok(Vec::new());
        };
        self.ensure_vector_table(config.dimensions).await?;
        let table = self.table_for(config.dimensions);
        let rows = self
            .db
            .query(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM {table} \
                     WHERE repo_root = ? AND path = ? ORDER BY start_line ASC"
                ),
                &[SqlValue::from(repo_root), SqlValue::from(path)],
            )
            .await?;
        rows.iter().map(row_to_record).collect()
    }

    /// All embeddings for one repo.
    pub async fn get_all(&self, repo_root: &str) -> CodetectResult<Vec<EmbeddingRecord>> {
        let roots = [repo_root.to_string()];
        self.get_all_across_repos(&roots).await
    }

    /// All embeddings across several repos.
    ///
    /// Cross-repo reads are constrained to a single dimension group;
    /// mixing groups is an integrity error.
    pub async fn get_all_across_repos(
        &self,
        repo_roots: &[String],
    ) -> CodetectResult<Vec<EmbeddingRecord>> {
        let Some(dimensions) = self.shared_dimension_group(repo_roots).await? else {
            return Ok(Vec::new());
        };
        self.ensure_vector_table(dimensions).await?;
        let table = self.table_for(dimensions);

        let placeholders = vec!["?"; repo_roots.len()].join(", ");
        let params: Vec<SqlValue> = repo_roots
            .iter()
            .map(|r| SqlValue::from(r.clone()))
            .collect();
        let rows = self
            .db
            .query(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM {table} \
                     WHERE repo_root IN ({placeholders}) \
                     ORDER BY repo_root, path, start_line"
                ),
                &params,
            )
            .await?;
        rows.iter().map(row_to_record).collect()
    }

    /// Number of embedding rows for one repo.
    pub async fn count(&self, repo_root: &str) -> CodetectResult<usize> {
        let Some(config) = self.get_repo_config(repo_root).await? else {
            return Ok(0);
        };
        self.ensure_vector_table(config.dimensions).await?;
        let table = self.table_for(config.dimensions);
        let count = self
            .db
            .query_row(
                &format!("SELECT COUNT(*) FROM {table} WHERE repo_root = ?"),
                &[SqlValue::from(repo_root)],
            )
            .await?
            .map(|r| r.get_i64(0))
            .transpose()?
            .unwrap_or(0);
        Ok(count as usize)
    }

    // -----------------------------------------------------------------
    // KNN
    // -----------------------------------------------------------------

    /// Top-k chunks by cosine similarity to the query vector.
    ///
    /// The networked engine answers server-side through its HNSW index
    /// (`1 - distance`); the embedded engine falls back to the
    /// brute-force scan. Callers trust whichever index is configured.
    pub async fn knn(
        &self,
        repo_roots: &[String],
        query: &[f32],
        k: usize,
    ) -> CodetectResult<Vec<(EmbeddingRecord, f32)>> {
        if k == 0 || repo_roots.is_empty() {
            return Ok(Vec::new());
        }
        match self.engine() {
            DbEngine::Sqlite => self.knn_brute_force(repo_roots, query, k).await,
            DbEngine::Postgres => self.knn_native(repo_roots, query, k).await,
        }
    }

    async fn knn_brute_force(
        &self,
        repo_roots: &[String],
        query: &[f32],
        k: usize,
    ) -> CodetectResult<Vec<(EmbeddingRecord, f32)>> {
        let records = self.get_all_across_repos(repo_roots).await?;
        let vectors: Vec<Vec<f32>> = records.iter().map(|r| r.vector.clone()).collect();
        let top = vector::brute_force_top_k(query, &vectors, k);
        Ok(top
            .into_iter()
            .map(|(idx, score)| (records[idx].clone(), score))
            .collect())
    }

    async fn knn_native(
        &self,
        repo_roots: &[String],
        query: &[f32],
        k: usize,
    ) -> CodetectResult<Vec<(EmbeddingRecord, f32)>> {
        let Some(dimensions) = self.shared_dimension_group(repo_roots).await? else {
            return Ok(Vec::new());
        };
        if query.len() != dimensions {
            return Err(CodetectError::DimensionMismatch {
                expected: dimensions,
                actual: query.len(),
            });
        }
        self.ensure_vector_table(dimensions).await?;
        let table = self.table_for(dimensions);

        let placeholders = vec!["?"; repo_roots.len()].join(", ");
        let mut params: Vec<SqlValue> = vec![SqlValue::Vector(query.to_vec())];
        params.extend(repo_roots.iter().map(|r| SqlValue::from(r.clone())));
        params.push(SqlValue::Vector(query.to_vec()));
        params.push(SqlValue::from(k));

        let rows = self
            .db
            .query(
                &format!(
                    "SELECT {RECORD_COLUMNS}, 1 - (embedding <=> ?) AS score \
                     FROM {table} \
                     WHERE repo_root IN ({placeholders}) \
                     ORDER BY embedding <=> ? ASC \
                     LIMIT ?"
                ),
                &params,
            )
            .await?;

        rows.iter()
            .map(|row| Ok((row_to_record(row)?, row.get_f64(8)? as f32)))
            .collect()
    }

    // -----------------------------------------------------------------
    // Model / dimension lifecycle
    // -----------------------------------------------------------------

    /// The repo's current embedding config, if any.
    pub async fn get_repo_config(
        &self,
        repo_root: &str,
    ) -> CodetectResult<Option<RepoEmbeddingConfig>> {
        let row = self
            .db
            .query_row(
                "SELECT repo_root, model, dimensions, created_at, updated_at \
                 FROM repo_embedding_configs WHERE repo_root = ?",
                &[SqlValue::from(repo_root)],
            )
            .await?;
        row.map(|r| {
            Ok(RepoEmbeddingConfig {
                repo_root: r.get_string(0)?,
                model: r.get_string(1)?,
                dimensions: r.get_i64(2)? as usize,
                created_at: r.get_i64(3)?,
                updated_at: r.get_i64(4)?,
            })
        })
        .transpose()
    }

    /// Record (or overwrite) the repo's model and dimension group.
    pub async fn set_repo_config(
        &self,
        repo_root: &str,
        model: &str,
        dimensions: usize,
    ) -> CodetectResult<()> {
        let now = now_secs();
        let created_at = self
            .get_repo_config(repo_root)
            .await?
            .map(|c| c.created_at)
            .unwrap_or(now);
        let upsert = self.db.dialect().upsert(
            "repo_embedding_configs",
            &["repo_root", "model", "dimensions", "created_at", "updated_at"],
            &["repo_root"],
        );
        self.db
            .exec(
                &upsert,
                &[
                    SqlValue::from(repo_root),
                    SqlValue::from(model),
                    SqlValue::from(dimensions),
                    SqlValue::from(created_at),
                    SqlValue::from(now),
                ],
            )
            .await?;
        Ok(())
    }

    /// Compare the repo's recorded dimensions against a new model's.
    ///
    /// Returns `(recorded dimensions, mismatch?)`; `(None, false)` for
    /// a repo with no config yet.
    pub async fn check_dimension_mismatch(
        &self,
        repo_root: &str,
        new_dimensions: usize,
    ) -> CodetectResult<(Option<usize>, bool)> {
        match self.get_repo_config(repo_root).await? {
            Some(config) => {
                let mismatch = config.dimensions != new_dimensions;
                Ok((Some(config.dimensions), mismatch))
            }
            None => Ok((None, false)),
        }
    }

    /// Service a dimension transition: delete the repo's vectors from
    /// the old-dimension table and move its config to the new group.
    ///
    /// Re-embedding afterwards is the caller's responsibility.
    pub async fn migrate_repo_dimensions(
        &self,
        repo_root: &str,
        old_dimensions: usize,
        new_dimensions: usize,
        new_model: &str,
    ) -> CodetectResult<()> {
        self.ensure_vector_table(old_dimensions).await?;
        let old_table = self.table_for(old_dimensions);
        self.db
            .exec(
                &format!("DELETE FROM {old_table} WHERE repo_root = ?"),
                &[SqlValue::from(repo_root)],
            )
            .await?;
        self.set_repo_config(repo_root, new_model, new_dimensions).await?;
        tracing::info!(
            repo = repo_root,
            old = old_dimensions,
            new = new_dimensions,
            model = new_model,
            "migrated repo dimension group"
        );
        Ok(())
    }

    /// Resolve the single dimension group shared by the given repos.
    async fn shared_dimension_group(
        &self,
        repo_roots: &[String],
    ) -> CodetectResult<Option<usize>> {
        let mut dimensions = None;
        for repo_root in repo_roots {
            let Some(config) = self.get_repo_config(repo_root).await? else {
                continue;
            };
            match dimensions {
                None => dimensions = Some(config.dimensions),
                Some(d) if d != config.dimensions => {
                    return Err(CodetectError::DimensionMismatch {
                        expected: d,
                        actual: config.dimensions,
                    });
                }
                Some(_) => {}
            }
        }
        Ok(dimensions)
    }
}

fn row_to_record(row: &SqlRow) -> CodetectResult<EmbeddingRecord> {
    Ok(EmbeddingRecord {
        repo_root: row.get_string(0)?,
        path: row.get_string(1)?,
        start_line: row.get_i64(2)? as u32,
        end_line: row.get_i64(3)? as u32,
        content_hash: row.get_string(4)?,
        vector: row.get_vector(5)?,
        model: row.get_string(6)?,
        created_at: row.get_i64(7)?,
    })
}
