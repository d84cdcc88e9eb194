//! SQLite backend using `rusqlite`.
//!
//! [`SqliteBackend`] implements [`DbExecutor`] by running every `rusqlite`
//! call inside `tokio::task::spawn_blocking`, with the connection behind a
//! `tokio::sync::Mutex`.
//!
//! - Foreign-key enforcement is switched on for every connection.
//! - File databases use WAL journaling.
//! - `:memory:` opens a private in-memory database.
//! - Constraint failures are reported as
//!   [`TesseraError::ConstraintViolation`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tessera_core::{TesseraError, TesseraResult};
use tessera_db::executor::{returns_rows, Cursor, DatabaseBackendType, DbExecutor};
use tessera_db::{Row, Value};
use tokio::sync::Mutex;
use tracing::debug;

/// The path that selects an in-memory database.
pub const MEMORY: &str = ":memory:";

/// A SQLite connection.
pub struct SqliteBackend {
    path: PathBuf,
    /// `None` once closed.
    conn: Arc<Mutex<Option<rusqlite::Connection>>>,
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Maps a driver error, keeping constraint failures distinguishable.
fn map_err(e: rusqlite::Error) -> TesseraError {
    match &e {
        rusqlite::Error::SqliteFailure(err, msg)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            TesseraError::ConstraintViolation(msg.clone().unwrap_or_else(|| e.to_string()))
        }
        _ => TesseraError::DatabaseError(e.to_string()),
    }
}

fn join_err(e: tokio::task::JoinError) -> TesseraError {
    TesseraError::DatabaseError(format!("Task join error: {e}"))
}

fn closed_err() -> TesseraError {
    TesseraError::OperationalError("SQLite connection is closed".to_string())
}

/// Pragma names and values are interpolated into SQL, so only bare words
/// and numbers pass.
fn is_pragma_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_pragma_value(value: &str) -> bool {
    is_pragma_name(value.strip_prefix('-').unwrap_or(value))
}

impl SqliteBackend {
    /// Opens the database at `path`, applying each option as
    /// `PRAGMA key = value` after the defaults.
    pub fn open(path: impl AsRef<Path>, options: &HashMap<String, String>) -> TesseraResult<Self> {
        let path = path.as_ref().to_path_buf();
        let in_memory = path.to_str() == Some(MEMORY);
        let conn = if in_memory {
            rusqlite::Connection::open_in_memory()
        } else {
            rusqlite::Connection::open(&path)
        }
        .map_err(|e| TesseraError::OperationalError(format!("SQLite open failed: {e}")))?;

        let mut pragmas = String::from("PRAGMA foreign_keys=ON;");
        if !in_memory {
            pragmas.push_str(" PRAGMA journal_mode=WAL;");
        }
        let mut keys: Vec<&String> = options.keys().collect();
        keys.sort();
        for key in keys {
            if !is_pragma_name(key) {
                return Err(TesseraError::ConfigurationError(format!(
                    "Invalid SQLite pragma name '{key}'"
                )));
            }
            let value = &options[key];
            if !is_pragma_value(value) {
                return Err(TesseraError::ConfigurationError(format!(
                    "Invalid value '{value}' for SQLite pragma '{key}'"
                )));
            }
            pragmas.push_str(&format!(" PRAGMA {key}={value};"));
        }
        conn.execute_batch(&pragmas)
            .map_err(|e| TesseraError::OperationalError(format!("Failed to set pragmas: {e}")))?;
        debug!(path = %path.display(), "Opened SQLite database");

        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    /// Opens a private in-memory database.
    pub fn memory() -> TesseraResult<Self> {
        Self::open(MEMORY, &HashMap::new())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn bind_params(stmt: &mut rusqlite::Statement<'_>, params: &[Value]) -> TesseraResult<()> {
        for (i, param) in params.iter().enumerate() {
            let idx = i + 1;
            match param {
                Value::Null => stmt.raw_bind_parameter(idx, rusqlite::types::Null),
                Value::Bool(b) => stmt.raw_bind_parameter(idx, b),
                Value::Int(v) => stmt.raw_bind_parameter(idx, v),
                Value::Float(v) => stmt.raw_bind_parameter(idx, v),
                Value::String(s) => stmt.raw_bind_parameter(idx, s.as_str()),
                Value::Bytes(b) => stmt.raw_bind_parameter(idx, b.as_slice()),
                Value::Date(d) => stmt.raw_bind_parameter(idx, d.to_string().as_str()),
                Value::DateTime(dt) => stmt.raw_bind_parameter(idx, dt.to_string().as_str()),
                Value::Uuid(u) => stmt.raw_bind_parameter(idx, u.to_string().as_str()),
                Value::Json(j) => stmt.raw_bind_parameter(idx, j.to_string().as_str()),
            }
            .map_err(|e| TesseraError::DatabaseError(format!("Bind error: {e}")))?;
        }
        Ok(())
    }

    fn convert_row(sqlite_row: &rusqlite::Row<'_>, column_names: &[String]) -> Row {
        use rusqlite::types::ValueRef;

        let values: Vec<Value> = (0..column_names.len())
            .map(|i| match sqlite_row.get_ref(i).unwrap_or(ValueRef::Null) {
                ValueRef::Null => Value::Null,
                ValueRef::Integer(v) => Value::Int(v),
                ValueRef::Real(v) => Value::Float(v),
                ValueRef::Text(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
                ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
            })
            .collect();
        Row::new(column_names.to_vec(), values)
    }

    /// Runs `f` on the connection in a blocking task.
    async fn with_conn<T, F>(&self, f: F) -> TesseraResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> TesseraResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.blocking_lock();
            let conn = guard.as_ref().ok_or_else(closed_err)?;
            f(conn)
        })
        .await
        .map_err(join_err)?
    }

    fn run_execute(conn: &rusqlite::Connection, sql: &str, params: &[Value]) -> TesseraResult<u64> {
        let mut stmt = conn.prepare(sql).map_err(map_err)?;
        Self::bind_params(&mut stmt, params)?;
        let count = stmt.raw_execute().map_err(map_err)?;
        Ok(count as u64)
    }

    /// Column names come from the prepared statement, so an empty result
    /// still reports them.
    fn run_query(
        conn: &rusqlite::Connection,
        sql: &str,
        params: &[Value],
    ) -> TesseraResult<(Vec<String>, Vec<Row>)> {
        let mut stmt = conn.prepare(sql).map_err(map_err)?;
        let column_names: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(String::from)
            .collect();
        Self::bind_params(&mut stmt, params)?;

        let mut raw_rows = stmt.raw_query();
        let mut rows = Vec::new();
        while let Some(row) = raw_rows.next().map_err(map_err)? {
            rows.push(Self::convert_row(row, &column_names));
        }
        Ok((column_names, rows))
    }
}

#[async_trait::async_trait]
impl DbExecutor for SqliteBackend {
    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::SQLite
    }

    async fn execute_sql(&self, sql: &str, params: &[Value]) -> TesseraResult<u64> {
        let sql = sql.to_string();
        let params = params.to_vec();
        self.with_conn(move |conn| Self::run_execute(conn, &sql, &params))
            .await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> TesseraResult<Vec<Row>> {
        let sql = sql.to_string();
        let params = params.to_vec();
        self.with_conn(move |conn| Self::run_query(conn, &sql, &params).map(|(_, rows)| rows))
            .await
    }

    async fn insert_returning_id(&self, sql: &str, params: &[Value]) -> TesseraResult<Value> {
        let sql = sql.to_string();
        let params = params.to_vec();
        self.with_conn(move |conn| {
            Self::run_execute(conn, &sql, &params)?;
            Ok(Value::Int(conn.last_insert_rowid()))
        })
        .await
    }

    async fn cursor(&self, sql: &str, params: &[Value]) -> TesseraResult<Cursor> {
        let sql = sql.to_string();
        let params = params.to_vec();
        self.with_conn(move |conn| {
            if returns_rows(&sql) {
                let (columns, rows) = Self::run_query(conn, &sql, &params)?;
                Ok(Cursor::from_rows(columns, rows))
            } else {
                let affected = Self::run_execute(conn, &sql, &params)?;
                let is_insert = sql.trim_start().to_ascii_uppercase().starts_with("INSERT");
                let last_id =
                    (affected > 0 && is_insert).then(|| Value::Int(conn.last_insert_rowid()));
                Ok(Cursor::from_execution(affected, last_id))
            }
        })
        .await
    }

    async fn close(&self) -> TesseraResult<()> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.blocking_lock();
            match guard.take() {
                Some(c) => c.close().map_err(|(c, e)| {
                    *guard = Some(c);
                    TesseraError::OperationalError(format!("SQLite close failed: {e}"))
                }),
                None => Err(closed_err()),
            }
        })
        .await
        .map_err(join_err)?
    }
}
