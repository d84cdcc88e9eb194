//! Parameterized CRUD statements.
//!
//! [`SqlCompiler`] turns a table name, column values and a list of
//! [`Filter`]s into SQL with the backend's placeholder style. Filters are
//! joined with `AND`; an empty list matches every row.

use crate::executor::DatabaseBackendType;
use crate::value::Value;

/// A row predicate on one column.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `column = value`. `Value::Null` compiles to `IS NULL`.
    Eq(String, Value),
    /// `column IN (...)`. An empty list matches nothing.
    In(String, Vec<Value>),
    /// `column IS NULL` when `true`, `IS NOT NULL` when `false`.
    IsNull(String, bool),
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(column.into(), value.into())
    }

    pub fn is_in(column: impl Into<String>, values: Vec<Value>) -> Self {
        Self::In(column.into(), values)
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Self::IsNull(column.into(), true)
    }

    pub fn is_not_null(column: impl Into<String>) -> Self {
        Self::IsNull(column.into(), false)
    }
}

/// Compiles CRUD statements for one backend.
///
/// # Examples
///
/// ```
/// use tessera_db::compiler::{Filter, SqlCompiler};
/// use tessera_db::executor::DatabaseBackendType;
///
/// let compiler = SqlCompiler::new(DatabaseBackendType::PostgreSQL);
/// let (sql, params) = compiler.compile_select("tweet", &[Filter::eq("user_id", 3)], None);
/// assert_eq!(sql, "SELECT * FROM \"tweet\" WHERE \"user_id\" = $1");
/// assert_eq!(params.len(), 1);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct SqlCompiler {
    backend: DatabaseBackendType,
}

impl SqlCompiler {
    pub const fn new(backend: DatabaseBackendType) -> Self {
        Self { backend }
    }

    pub const fn backend(&self) -> DatabaseBackendType {
        self.backend
    }

    fn quote(&self, ident: &str) -> String {
        self.backend.quote(ident)
    }

    /// Compiles an INSERT. With no columns, inserts a row of defaults.
    pub fn compile_insert(&self, table: &str, fields: &[(String, Value)]) -> (String, Vec<Value>) {
        if fields.is_empty() {
            let sql = match self.backend {
                DatabaseBackendType::MySQL => format!("INSERT INTO {} () VALUES ()", self.quote(table)),
                _ => format!("INSERT INTO {} DEFAULT VALUES", self.quote(table)),
            };
            return (sql, Vec::new());
        }
        let columns: Vec<String> = fields.iter().map(|(name, _)| self.quote(name)).collect();
        let placeholders: Vec<String> = (1..=fields.len())
            .map(|i| self.backend.placeholder(i))
            .collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.quote(table),
            columns.join(", "),
            placeholders.join(", ")
        );
        (sql, fields.iter().map(|(_, v)| v.clone()).collect())
    }

    /// Compiles an UPDATE of `fields` on rows matching `filters`.
    pub fn compile_update(
        &self,
        table: &str,
        fields: &[(String, Value)],
        filters: &[Filter],
    ) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let set_parts: Vec<String> = fields
            .iter()
            .map(|(name, val)| {
                params.push(val.clone());
                format!("{} = {}", self.quote(name), self.backend.placeholder(params.len()))
            })
            .collect();
        let mut sql = format!("UPDATE {} SET {}", self.quote(table), set_parts.join(", "));
        self.push_where(filters, &mut sql, &mut params);
        (sql, params)
    }

    /// Compiles a SELECT of all columns. `limit` bounds the row count.
    pub fn compile_select(
        &self,
        table: &str,
        filters: &[Filter],
        limit: Option<usize>,
    ) -> (String, Vec<Value>) {
        self.compile_select_columns(table, &[], filters, limit)
    }

    /// Compiles a SELECT of specific columns; an empty list selects `*`.
    pub fn compile_select_columns(
        &self,
        table: &str,
        columns: &[&str],
        filters: &[Filter],
        limit: Option<usize>,
    ) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let select = if columns.is_empty() {
            "*".to_string()
        } else {
            columns
                .iter()
                .map(|c| self.quote(c))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let mut sql = format!("SELECT {select} FROM {}", self.quote(table));
        self.push_where(filters, &mut sql, &mut params);
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        (sql, params)
    }

    /// Compiles a `SELECT COUNT(*)` aliased as `count`.
    pub fn compile_count(&self, table: &str, filters: &[Filter]) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = format!("SELECT COUNT(*) AS count FROM {}", self.quote(table));
        self.push_where(filters, &mut sql, &mut params);
        (sql, params)
    }

    /// Compiles a DELETE of rows matching `filters`.
    pub fn compile_delete(&self, table: &str, filters: &[Filter]) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM {}", self.quote(table));
        self.push_where(filters, &mut sql, &mut params);
        (sql, params)
    }

    fn push_where(&self, filters: &[Filter], sql: &mut String, params: &mut Vec<Value>) {
        if filters.is_empty() {
            return;
        }
        let conditions: Vec<String> = filters
            .iter()
            .map(|f| self.compile_filter(f, params))
            .collect();
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }

    fn compile_filter(&self, filter: &Filter, params: &mut Vec<Value>) -> String {
        match filter {
            Filter::Eq(column, Value::Null) | Filter::IsNull(column, true) => {
                format!("{} IS NULL", self.quote(column))
            }
            Filter::IsNull(column, false) => format!("{} IS NOT NULL", self.quote(column)),
            Filter::Eq(column, value) => {
                params.push(value.clone());
                format!("{} = {}", self.quote(column), self.backend.placeholder(params.len()))
            }
            Filter::In(_, values) if values.is_empty() => "1 = 0".to_string(),
            Filter::In(column, values) => {
                let placeholders: Vec<String> = values
                    .iter()
                    .map(|v| {
                        params.push(v.clone());
                        self.backend.placeholder(params.len())
                    })
                    .collect();
                format!("{} IN ({})", self.quote(column), placeholders.join(", "))
            }
        }
    }
}
