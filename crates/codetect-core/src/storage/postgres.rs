//! Networked engine backend (sqlx + pgvector).
//!
//! SQL arriving here has already been rewritten to `$N` placeholders
//! by the adapter. Rows come back typed; this module maps them onto
//! the adapter's engine-neutral values by column type name.

use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row, TypeInfo};

use super::{SqlRow, SqlValue, Statement};
use crate::error::{CodetectError, CodetectResult};

/// Networked Postgres database.
pub struct PostgresDb {
    pool: PgPool,
}

impl PostgresDb {
    /// Connect to the database and run the dialect's init statements.
    pub async fn connect(dsn: &str) -> CodetectResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(dsn)
            .await?;

        for sql in super::Dialect::Postgres.init_statements() {
            sqlx::query(sql).execute(&pool).await?;
        }

        Ok(Self { pool })
    }

    /// Execute a statement, returning the affected row count.
    pub async fn exec(&self, sql: &str, params: &[SqlValue]) -> CodetectResult<u64> {
        let result = bind_params(sqlx::query(sql), params)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Run a query, returning all rows.
    pub async fn query(&self, sql: &str, params: &[SqlValue]) -> CodetectResult<Vec<SqlRow>> {
        let rows = bind_params(sqlx::query(sql), params)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode_row).collect()
    }

    /// Execute statements atomically inside one transaction.
    ///
    /// Statements arrive with `?` placeholders (they are queued before
    /// the adapter dispatches), so each is rewritten here.
    pub async fn exec_batch(&self, statements: &[Statement]) -> CodetectResult<()> {
        let mut tx = self.pool.begin().await?;
        for stmt in statements {
            let sql = super::Dialect::Postgres.rewrite_placeholders(&stmt.sql);
            bind_params(sqlx::query(&sql), &stmt.params)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

type PgQuery<'q> = sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>;

fn bind_params<'q>(mut query: PgQuery<'q>, params: &[SqlValue]) -> PgQuery<'q> {
    for param in params {
        query = match param {
            SqlValue::Null => query.bind(Option::<String>::None),
            SqlValue::Integer(v) => query.bind(*v),
            SqlValue::Real(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.clone()),
            SqlValue::Blob(v) => query.bind(v.clone()),
            SqlValue::Vector(v) => query.bind(pgvector::Vector::from(v.clone())),
        };
    }
    query
}

fn decode_row(row: &PgRow) -> CodetectResult<SqlRow> {
    let mut values = Vec::with_capacity(row.columns().len());
    for (idx, column) in row.columns().iter().enumerate() {
        values.push(decode_column(row, idx, column.type_info().name())?);
    }
    Ok(SqlRow::new(values))
}

fn decode_column(row: &PgRow, idx: usize, type_name: &str) -> CodetectResult<SqlValue> {
    let value = match type_name.to_ascii_uppercase().as_str() {
        "INT2" => row
            .try_get::<Option<i16>, _>(idx)?
            .map(|v| SqlValue::Integer(i64::from(v))),
        "INT4" => row
            .try_get::<Option<i32>, _>(idx)?
            .map(|v| SqlValue::Integer(i64::from(v))),
        "INT8" => row
            .try_get::<Option<i64>, _>(idx)?
            .map(SqlValue::Integer),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(idx)?
            .map(|v| SqlValue::Real(f64::from(v))),
        "FLOAT8" => row.try_get::<Option<f64>, _>(idx)?.map(SqlValue::Real),
        "BOOL" => row
            .try_get::<Option<bool>, _>(idx)?
            .map(|v| SqlValue::Integer(i64::from(v))),
        "BYTEA" => row.try_get::<Option<Vec<u8>>, _>(idx)?.map(SqlValue::Blob),
        "VECTOR" => row
            .try_get::<Option<pgvector::Vector>, _>(idx)?
            .map(|v| SqlValue::Vector(v.to_vec())),
        "TEXT" | "VARCHAR" | "NAME" | "BPCHAR" => {
            row.try_get::<Option<String>, _>(idx)?.map(SqlValue::Text)
        }
        other => {
            return Err(CodetectError::Internal(format!(
                "unsupported column type {other} at index {idx}"
            )));
        }
    };
    Ok(value.unwrap_or(SqlValue::Null))
}
