//! Embedded engine backend (rusqlite).
//!
//! The connection is configured for WAL mode so readers stay live
//! during index writes. All calls are synchronous under a mutex;
//! `rusqlite::Connection` is not `Sync` and the single-writer model
//! matches SQLite's own constraint.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;

use super::{SqlRow, SqlValue, Statement};
use crate::error::{CodetectError, CodetectResult};

/// Embedded file-backed database.
pub struct SqliteDb {
    conn: Mutex<Connection>,
}

impl SqliteDb {
    /// Open or create a database file at the given path.
    pub fn open(path: &Path) -> CodetectResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> CodetectResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CodetectError::Internal("sqlite connection mutex poisoned".into()))
    }

    /// Execute a statement, returning the affected row count.
    ///
    /// Statements go through the connection's prepared-statement
    /// cache, so repeated business SQL is parsed once.
    pub fn exec(&self, sql: &str, params: &[SqlValue]) -> CodetectResult<u64> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(sql)?;
        let changed = stmt.execute(rusqlite::params_from_iter(to_params(params)))?;
        Ok(changed as u64)
    }

    /// Run a query, returning all rows.
    pub fn query(&self, sql: &str, params: &[SqlValue]) -> CodetectResult<Vec<SqlRow>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(sql)?;
        let column_count = stmt.column_count();

        let mut rows = stmt.query(rusqlite::params_from_iter(to_params(params)))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(column_count);
            for idx in 0..column_count {
                values.push(decode_value(row.get_ref(idx)?));
            }
            out.push(SqlRow::new(values));
        }
        Ok(out)
    }

    /// Execute statements atomically inside one transaction.
    pub fn exec_batch(&self, statements: &[Statement]) -> CodetectResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for stmt in statements {
            let mut prepared = tx.prepare_cached(&stmt.sql)?;
            prepared.execute(rusqlite::params_from_iter(to_params(&stmt.params)))?;
        }
        tx.commit()?;
        Ok(())
    }
}

/// Convert adapter values into rusqlite owned values.
///
/// Vectors become their JSON-text encoding; the embedded engine has
/// no native vector column.
fn to_params(params: &[SqlValue]) -> Vec<rusqlite::types::Value> {
    params
        .iter()
        .map(|p| match p {
            SqlValue::Null => rusqlite::types::Value::Null,
            SqlValue::Integer(v) => rusqlite::types::Value::Integer(*v),
            SqlValue::Real(v) => rusqlite::types::Value::Real(*v),
            SqlValue::Text(v) => rusqlite::types::Value::Text(v.clone()),
            SqlValue::Blob(v) => rusqlite::types::Value::Blob(v.clone()),
            SqlValue::Vector(v) => rusqlite::types::Value::Text(
                serde_json::to_string(v).unwrap_or_else(|_| "[]".into()),
            ),
        })
        .collect()
}

fn decode_value(value: rusqlite::types::ValueRef<'_>) -> SqlValue {
    use rusqlite::types::ValueRef;
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(v) => SqlValue::Integer(v),
        ValueRef::Real(v) => SqlValue::Real(v),
        ValueRef::Text(bytes) => SqlValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => SqlValue::Blob(bytes.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("a").join("b").join("test.db");
        let db = SqliteDb::open(&nested).expect("open");
        db.exec("CREATE TABLE t (a INTEGER)", &[]).expect("create");
        assert!(nested.exists());
    }

    #[test]
    fn test_null_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = SqliteDb::open(&dir.path().join("t.db")).expect("open");
        db.exec("CREATE TABLE t (a TEXT)", &[]).expect("create");
        db.exec("INSERT INTO t (a) VALUES (?)", &[SqlValue::Null])
            .expect("insert");

        let rows = db.query("SELECT a FROM t", &[]).expect("query");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_opt_string(0).expect("a"), None);
    }
}
