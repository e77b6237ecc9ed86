//! SQL dialect descriptions for the two supported engines.
//!
//! Everything engine-specific lives here: placeholder style,
//! auto-increment keys, binary and vector column types, upsert form,
//! and required initialisation statements. Stores build their DDL and
//! upserts through these helpers and write everything else with `?`
//! placeholders.

/// HNSW build parameters for the native ANN index.
///
/// `None` fields fall back to the engine's documented defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HnswParams {
    /// Connections per node (`m`).
    pub m: Option<u32>,
    /// Construction-time candidate list size (`ef_construction`).
    pub ef_construction: Option<u32>,
}

/// An abstract description of an SQL engine's syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Embedded engine: `?` placeholders, `INSERT OR REPLACE` upserts,
    /// vectors as JSON text.
    Sqlite,
    /// Networked engine: `$N` placeholders, `ON CONFLICT` upserts,
    /// native fixed-size vector columns.
    Postgres,
}

impl Dialect {
    /// Rewrite `?` placeholders into this dialect's form.
    ///
    /// `?` tokens inside single-quoted string literals are left
    /// untouched. SQLite SQL passes through unchanged.
    pub fn rewrite_placeholders(&self, sql: &str) -> String {
        match self {
            Self::Sqlite => sql.to_string(),
            Self::Postgres => {
                let mut out = String::with_capacity(sql.len() + 8);
                let mut in_string = false;
                let mut n = 0usize;
                for ch in sql.chars() {
                    match ch {
                        '\'' => {
                            in_string = !in_string;
                            out.push(ch);
                        }
                        '?' if !in_string => {
                            n += 1;
                            out.push('$');
                            out.push_str(&n.to_string());
                        }
                        _ => out.push(ch),
                    }
                }
                out
            }
        }
    }

    /// Column definition for an auto-increment primary key.
    pub fn auto_pk(&self) -> &'static str {
        match self {
            Self::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
            Self::Postgres => "BIGSERIAL PRIMARY KEY",
        }
    }

    /// Column type for a 64-bit integer.
    pub fn bigint_type(&self) -> &'static str {
        match self {
            Self::Sqlite => "INTEGER",
            Self::Postgres => "BIGINT",
        }
    }

    /// Column type for raw bytes.
    pub fn blob_type(&self) -> &'static str {
        match self {
            Self::Sqlite => "BLOB",
            Self::Postgres => "BYTEA",
        }
    }

    /// Column type for an embedding vector of the given length.
    pub fn vector_type(&self, dimensions: usize) -> String {
        match self {
            Self::Sqlite => "TEXT".to_string(),
            Self::Postgres => format!("VECTOR({dimensions})"),
        }
    }

    /// Build an upsert for the given conflict target.
    ///
    /// `columns` is the full insert list, `conflict` the unique-index
    /// columns, and every non-conflict column is overwritten on
    /// collision. Placeholders are emitted as `?`; callers pass the
    /// result through the adapter, which rewrites them.
    pub fn upsert(&self, table: &str, columns: &[&str], conflict: &[&str]) -> String {
        let col_list = columns.join(", ");
        let placeholders = vec!["?"; columns.len()].join(", ");
        match self {
            Self::Sqlite => {
                format!("INSERT OR REPLACE INTO {table} ({col_list}) VALUES ({placeholders})")
            }
            Self::Postgres => {
                let conflict_list = conflict.join(", ");
                let updates: Vec<String> = columns
                    .iter()
                    .filter(|c| !conflict.contains(c))
                    .map(|c| format!("{c} = EXCLUDED.{c}"))
                    .collect();
                format!(
                    "INSERT INTO {table} ({col_list}) VALUES ({placeholders}) \
                     ON CONFLICT ({conflict_list}) DO UPDATE SET {}",
                    updates.join(", ")
                )
            }
        }
    }

    /// `CREATE TABLE IF NOT EXISTS` from column definitions.
    pub fn create_table(&self, table: &str, columns: &[String]) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {table} ({})",
            columns.join(", ")
        )
    }

    /// `CREATE INDEX IF NOT EXISTS` over the given columns.
    pub fn create_index(
        &self,
        name: &str,
        table: &str,
        columns: &[&str],
        unique: bool,
    ) -> String {
        let kind = if unique { "UNIQUE INDEX" } else { "INDEX" };
        format!(
            "CREATE {kind} IF NOT EXISTS {name} ON {table} ({})",
            columns.join(", ")
        )
    }

    /// HNSW index DDL for a vector column, when the engine supports
    /// it. `None` on the embedded engine, which has no native ANN.
    pub fn create_hnsw_index(
        &self,
        name: &str,
        table: &str,
        column: &str,
        params: &HnswParams,
    ) -> Option<String> {
        match self {
            Self::Sqlite => None,
            Self::Postgres => {
                let mut options = Vec::new();
                if let Some(m) = params.m {
                    options.push(format!("m = {m}"));
                }
                if let Some(ef) = params.ef_construction {
                    options.push(format!("ef_construction = {ef}"));
                }
                let with_clause = if options.is_empty() {
                    String::new()
                } else {
                    format!(" WITH ({})", options.join(", "))
                };
                Some(format!(
                    "CREATE INDEX IF NOT EXISTS {name} ON {table} \
                     USING hnsw ({column} vector_cosine_ops){with_clause}"
                ))
            }
        }
    }

    /// Case-sensitive substring predicate over a column, consuming one
    /// `?` parameter. `LIKE` is unusable here: its case sensitivity
    /// differs between the engines.
    pub fn contains_predicate(&self, column: &str) -> String {
        match self {
            Self::Sqlite => format!("instr({column}, ?) > 0"),
            Self::Postgres => format!("strpos({column}, ?) > 0"),
        }
    }

    /// Statements to run once after connecting.
    pub fn init_statements(&self) -> Vec<&'static str> {
        match self {
            Self::Sqlite => Vec::new(),
            Self::Postgres => vec!["CREATE EXTENSION IF NOT EXISTS vector"],
        }
    }
}
