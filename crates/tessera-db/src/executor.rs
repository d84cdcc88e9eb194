//! The database executor trait and result cursors.
//!
//! [`DbExecutor`] is the seam between the ORM core and concrete backends.
//! Everything in `tessera-db` talks to the store through `&dyn DbExecutor`;
//! backends in `tessera-db-backends` implement it.

use std::collections::VecDeque;

use tessera_core::{TesseraError, TesseraResult};

use crate::row::Row;
use crate::value::Value;

/// The SQL dialect of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackendType {
    /// PostgreSQL (uses `$1, $2, ...` placeholders).
    PostgreSQL,
    /// SQLite (uses `?` placeholders).
    SQLite,
    /// MySQL (uses `?` placeholders and backtick quoting).
    MySQL,
}

impl DatabaseBackendType {
    /// Returns the parameter placeholder for a 1-based index.
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Self::PostgreSQL => format!("${index}"),
            Self::SQLite | Self::MySQL => "?".to_string(),
        }
    }

    /// Quotes an identifier for this dialect.
    pub fn quote(self, ident: &str) -> String {
        match self {
            Self::MySQL => format!("`{}`", ident.replace('`', "``")),
            Self::PostgreSQL | Self::SQLite => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    pub const fn vendor(self) -> &'static str {
        match self {
            Self::PostgreSQL => "postgresql",
            Self::SQLite => "sqlite",
            Self::MySQL => "mysql",
        }
    }

    /// Parses a dialect name as used in settings and on the command line.
    pub fn from_name(name: &str) -> TesseraResult<Self> {
        match name.to_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Self::SQLite),
            "postgres" | "postgresql" | "pg" => Ok(Self::PostgreSQL),
            "mysql" => Ok(Self::MySQL),
            other => Err(TesseraError::ConfigurationError(format!(
                "Unknown database dialect '{other}'"
            ))),
        }
    }
}

/// The result of a raw statement.
///
/// Rows are buffered when the statement runs; `fetch_one` and `fetch_all`
/// consume them in order.
#[derive(Debug, Clone, Default)]
pub struct Cursor {
    columns: Vec<String>,
    rows: VecDeque<Row>,
    rows_affected: u64,
    last_insert_id: Option<Value>,
}

impl Cursor {
    /// A cursor over the rows of a query. `rows_affected` is the row count.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            rows_affected: rows.len() as u64,
            rows: rows.into(),
            last_insert_id: None,
        }
    }

    /// A cursor for a statement that returned no rows.
    pub fn from_execution(rows_affected: u64, last_insert_id: Option<Value>) -> Self {
        Self {
            rows_affected,
            last_insert_id,
            ..Self::default()
        }
    }

    /// Takes the next row, or `None` when the cursor is exhausted.
    pub fn fetch_one(&mut self) -> Option<Row> {
        self.rows.pop_front()
    }

    /// Takes every remaining row.
    pub fn fetch_all(&mut self) -> Vec<Row> {
        self.rows.drain(..).collect()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub const fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    pub const fn last_insert_id(&self) -> Option<&Value> {
        self.last_insert_id.as_ref()
    }

    /// Number of rows not yet fetched.
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

/// Returns `true` when a statement produces a result set.
pub fn returns_rows(sql: &str) -> bool {
    let keyword = sql
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or_default()
        .to_uppercase();
    matches!(
        keyword.as_str(),
        "SELECT" | "WITH" | "PRAGMA" | "VALUES" | "EXPLAIN" | "SHOW"
    ) || sql.to_uppercase().contains(" RETURNING ")
}

/// Minimal async database executor.
///
/// The trait is object safe so managers and cascades can hold an
/// `Arc<dyn DbExecutor>` without knowing the backend.
#[async_trait::async_trait]
pub trait DbExecutor: Send + Sync {
    /// Returns the backend dialect.
    fn backend_type(&self) -> DatabaseBackendType;

    /// Runs a statement that does not return rows and returns the number of
    /// rows affected.
    async fn execute_sql(&self, sql: &str, params: &[Value]) -> TesseraResult<u64>;

    /// Runs a query and returns all rows.
    async fn query(&self, sql: &str, params: &[Value]) -> TesseraResult<Vec<Row>>;

    /// Runs a query expected to return exactly one row.
    ///
    /// Zero rows is `NotFound`, more than one is `MultipleObjectsReturned`.
    async fn query_one(&self, sql: &str, params: &[Value]) -> TesseraResult<Row> {
        let mut rows = self.query(sql, params).await?;
        match rows.len() {
            0 => Err(TesseraError::NotFound("No rows returned".to_string())),
            1 => Ok(rows.remove(0)),
            n => Err(TesseraError::MultipleObjectsReturned(format!(
                "Expected 1 row, got {n}"
            ))),
        }
    }

    /// Runs an INSERT and returns the generated key.
    ///
    /// The default issues the dialect's last-insert-id query on the same
    /// executor. Backends with direct access to the id should override it.
    async fn insert_returning_id(&self, sql: &str, params: &[Value]) -> TesseraResult<Value> {
        self.execute_sql(sql, params).await?;
        let id_query = match self.backend_type() {
            DatabaseBackendType::SQLite => "SELECT last_insert_rowid() AS id",
            DatabaseBackendType::PostgreSQL => "SELECT LASTVAL() AS id",
            DatabaseBackendType::MySQL => "SELECT LAST_INSERT_ID() AS id",
        };
        let row = self.query_one(id_query, &[]).await?;
        row.get::<Value>("id")
    }

    /// Runs any statement and returns a [`Cursor`].
    async fn cursor(&self, sql: &str, params: &[Value]) -> TesseraResult<Cursor> {
        if returns_rows(sql) {
            let rows = self.query(sql, params).await?;
            let columns = rows
                .first()
                .map(|r| r.columns().to_vec())
                .unwrap_or_default();
            Ok(Cursor::from_rows(columns, rows))
        } else {
            let affected = self.execute_sql(sql, params).await?;
            Ok(Cursor::from_execution(affected, None))
        }
    }

    /// Releases the underlying connection. Further use is an error.
    async fn close(&self) -> TesseraResult<()> {
        Ok(())
    }
}
