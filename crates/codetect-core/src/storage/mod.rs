//! One relational interface over two engines.
//!
//! Every store in the system talks to this module and writes its SQL
//! with `?` placeholders. The adapter rewrites placeholders for the
//! engine in use and the [`Dialect`] generates every engine-specific
//! DDL fragment, so no business component ever embeds an
//! engine-specific token. That invariant is what keeps the two engines
//! swappable without touching callers.
//!
//! ## Concurrency
//!
//! The adapter owns the connection (SQLite) or pool (Postgres) for the
//! life of the process. Every method is safe to call concurrently; no
//! caller holds a transaction open across an await on foreign I/O.

pub mod dialect;
mod postgres;
mod sqlite;

use std::path::Path;

pub use dialect::Dialect;

use crate::config::{Config, DbEngine};
use crate::error::{CodetectError, CodetectResult};

// ---------------------------------------------------------------------------
// Values and rows
// ---------------------------------------------------------------------------

/// A parameter value bound into a SQL statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    /// 64-bit integer.
    Integer(i64),
    /// Double-precision float.
    Real(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Blob(Vec<u8>),
    /// Embedding vector. Stored as JSON text on the embedded engine
    /// and as a native `VECTOR` column on the networked engine.
    Vector(Vec<f32>),
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<u32> for SqlValue {
    fn from(v: u32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<usize> for SqlValue {
    fn from(v: usize) -> Self {
        Self::Integer(v as i64)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Option<String>> for SqlValue {
    fn from(v: Option<String>) -> Self {
        match v {
            Some(s) => Self::Text(s),
            None => Self::Null,
        }
    }
}

impl From<Vec<f32>> for SqlValue {
    fn from(v: Vec<f32>) -> Self {
        Self::Vector(v)
    }
}

/// One decoded result row; values appear in select-list order.
#[derive(Debug, Clone)]
pub struct SqlRow {
    values: Vec<SqlValue>,
}

impl SqlRow {
    pub(crate) fn new(values: Vec<SqlValue>) -> Self {
        Self { values }
    }

    /// Number of columns in the row.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn value(&self, idx: usize) -> CodetectResult<&SqlValue> {
        self.values.get(idx).ok_or_else(|| {
            CodetectError::Internal(format!("row has no column {idx}"))
        })
    }

    /// Read column `idx` as an integer.
    pub fn get_i64(&self, idx: usize) -> CodetectResult<i64> {
        match self.value(idx)? {
            SqlValue::Integer(v) => Ok(*v),
            SqlValue::Real(v) => Ok(*v as i64),
            other => Err(CodetectError::Internal(format!(
                "column {idx} is not an integer: {other:?}"
            ))),
        }
    }

    /// Read column `idx` as a float.
    pub fn get_f64(&self, idx: usize) -> CodetectResult<f64> {
        match self.value(idx)? {
            SqlValue::Real(v) => Ok(*v),
            SqlValue::Integer(v) => Ok(*v as f64),
            other => Err(CodetectError::Internal(format!(
                "column {idx} is not a float: {other:?}"
            ))),
        }
    }

    /// Read column `idx` as text.
    pub fn get_string(&self, idx: usize) -> CodetectResult<String> {
        match self.value(idx)? {
            SqlValue::Text(v) => Ok(v.clone()),
            other => Err(CodetectError::Internal(format!(
                "column {idx} is not text: {other:?}"
            ))),
        }
    }

    /// Read a nullable text column.
    pub fn get_opt_string(&self, idx: usize) -> CodetectResult<Option<String>> {
        match self.value(idx)? {
            SqlValue::Null => Ok(None),
            SqlValue::Text(v) => Ok(Some(v.clone())),
            other => Err(CodetectError::Internal(format!(
                "column {idx} is not nullable text: {other:?}"
            ))),
        }
    }

    /// Read column `idx` as an embedding vector.
    ///
    /// Accepts the native vector type or its JSON-text encoding,
    /// whichever the engine returned.
    pub fn get_vector(&self, idx: usize) -> CodetectResult<Vec<f32>> {
        match self.value(idx)? {
            SqlValue::Vector(v) => Ok(v.clone()),
            SqlValue::Text(json) => {
                serde_json::from_str(json).map_err(CodetectError::from)
            }
            other => Err(CodetectError::Internal(format!(
                "column {idx} is not a vector: {other:?}"
            ))),
        }
    }
}

/// One statement of a transactional batch.
#[derive(Debug, Clone)]
pub struct Statement {
    /// SQL with `?` placeholders.
    pub sql: String,
    /// Bound parameters, in placeholder order.
    pub params: Vec<SqlValue>,
}

impl Statement {
    /// Build a statement from SQL and parameters.
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

// ---------------------------------------------------------------------------
// Database handle
// ---------------------------------------------------------------------------

/// A connection to one of the two supported engines.
pub enum Database {
    /// Embedded file-backed engine.
    Sqlite(sqlite::SqliteDb),
    /// Networked engine.
    Postgres(postgres::PostgresDb),
}

impl Database {
    /// Open the engine selected by the configuration.
    pub async fn open(config: &Config) -> CodetectResult<Self> {
        match config.database.engine {
            DbEngine::Sqlite => {
                let path = config.database.resolved_path(&config.repo_root);
                Self::open_sqlite(&path)
            }
            DbEngine::Postgres => {
                let dsn = config.database.dsn.as_deref().ok_or_else(|| {
                    CodetectError::Config {
                        details: "CODETECT_DB_DSN is required for the postgres engine".into(),
                    }
                })?;
                Self::connect_postgres(dsn).await
            }
        }
    }

    /// Open an embedded database at an explicit path.
    pub fn open_sqlite(path: &Path) -> CodetectResult<Self> {
        Ok(Self::Sqlite(sqlite::SqliteDb::open(path)?))
    }

    /// Connect to a networked database by DSN.
    pub async fn connect_postgres(dsn: &str) -> CodetectResult<Self> {
        Ok(Self::Postgres(postgres::PostgresDb::connect(dsn).await?))
    }

    /// The dialect for the engine in use.
    pub fn dialect(&self) -> Dialect {
        match self {
            Self::Sqlite(_) => Dialect::Sqlite,
            Self::Postgres(_) => Dialect::Postgres,
        }
    }

    /// Execute a statement, returning the affected row count.
    pub async fn exec(&self, sql: &str, params: &[SqlValue]) -> CodetectResult<u64> {
        match self {
            Self::Sqlite(db) => db.exec(sql, params),
            Self::Postgres(db) => {
                db.exec(&Dialect::Postgres.rewrite_placeholders(sql), params).await
            }
        }
    }

    /// Run a query, returning all rows.
    pub async fn query(&self, sql: &str, params: &[SqlValue]) -> CodetectResult<Vec<SqlRow>> {
        match self {
            Self::Sqlite(db) => db.query(sql, params),
            Self::Postgres(db) => {
                db.query(&Dialect::Postgres.rewrite_placeholders(sql), params).await
            }
        }
    }

    /// Run a query, returning the first row if any.
    pub async fn query_row(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> CodetectResult<Option<SqlRow>> {
        let mut rows = self.query(sql, params).await?;
        if rows.is_empty() {
            Ok(None)
        } else {
            Ok(Some(rows.swap_remove(0)))
        }
    }

    /// Execute a batch of statements in one transaction.
    ///
    /// All statements commit together or roll back together.
    pub async fn exec_batch(&self, statements: &[Statement]) -> CodetectResult<()> {
        match self {
            Self::Sqlite(db) => db.exec_batch(statements),
            Self::Postgres(db) => db.exec_batch(statements).await,
        }
    }
}
