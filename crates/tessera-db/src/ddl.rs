//! DDL generation.
//!
//! A [`SchemaEditor`] renders [`TableDef`]s as `CREATE TABLE`, `CREATE INDEX`
//! and `DROP TABLE` statements for one dialect. Foreign keys are emitted as
//! table constraints inside `CREATE TABLE`, so tables must be created in
//! dependency order (see [`crate::resolver`]).

use crate::executor::DatabaseBackendType;
use crate::schema::{ColumnDef, ColumnDefault, ColumnType, TableDef};
use crate::value::Value;

/// Generates DDL for one SQL dialect.
pub trait SchemaEditor: Send + Sync {
    /// Returns the dialect this editor targets.
    fn backend_type(&self) -> DatabaseBackendType;

    /// Returns the type name of a column.
    fn column_type_sql(&self, column: &ColumnDef) -> String;

    /// Returns the clause making an auto column generate its values, placed
    /// after `PRIMARY KEY` on SQLite and before it elsewhere.
    fn auto_increment_sql(&self) -> &'static str;

    /// Renders a boolean literal.
    fn bool_literal(&self, value: bool) -> &'static str {
        if value {
            "1"
        } else {
            "0"
        }
    }

    fn quote(&self, ident: &str) -> String {
        self.backend_type().quote(ident)
    }

    /// Returns the full column definition (name, type, constraints).
    fn column_sql(&self, column: &ColumnDef) -> String {
        let mut sql = format!("{} {}", self.quote(&column.name), self.column_type_sql(column));
        if !column.null || column.primary_key {
            sql.push_str(" NOT NULL");
        }
        if let Some(ColumnDefault::Value(value)) = &column.default {
            if let Some(literal) = self.default_literal(value) {
                sql.push_str(&format!(" DEFAULT {literal}"));
            }
        }
        if column.primary_key {
            let auto = column.ty.is_auto();
            let sqlite = self.backend_type() == DatabaseBackendType::SQLite;
            if auto && !sqlite {
                sql.push_str(self.auto_increment_sql());
            }
            sql.push_str(" PRIMARY KEY");
            if auto && sqlite {
                sql.push_str(self.auto_increment_sql());
            }
        }
        sql
    }

    /// Renders a value as a `DEFAULT` literal. Binary values have none.
    fn default_literal(&self, value: &Value) -> Option<String> {
        match value {
            Value::Null => Some("NULL".to_string()),
            Value::Bool(b) => Some(self.bool_literal(*b).to_string()),
            Value::Bytes(_) => None,
            other => Some(other.to_string()),
        }
    }

    /// Generates `CREATE TABLE` with inline foreign-key constraints.
    fn create_table(&self, table: &TableDef, safe: bool) -> String {
        let mut parts: Vec<String> = table.columns.iter().map(|c| self.column_sql(c)).collect();
        for (column, fk) in table.foreign_keys() {
            let mut constraint = format!(
                "FOREIGN KEY ({}) REFERENCES {} ({})",
                self.quote(&column.name),
                self.quote(&fk.table),
                self.quote(&fk.column)
            );
            if let Some(action) = fk.on_delete.as_sql() {
                constraint.push_str(&format!(" ON DELETE {action}"));
            }
            parts.push(constraint);
        }
        let if_not_exists = if safe { "IF NOT EXISTS " } else { "" };
        format!(
            "CREATE TABLE {if_not_exists}{} ({})",
            self.quote(&table.name),
            parts.join(", ")
        )
    }

    /// Generates one `CREATE INDEX` per declared or implied index.
    fn create_indexes(&self, table: &TableDef, safe: bool) -> Vec<String> {
        table
            .all_indexes()
            .iter()
            .map(|index| {
                let unique = if index.unique { "UNIQUE " } else { "" };
                let if_not_exists = if safe && self.backend_type() != DatabaseBackendType::MySQL
                {
                    "IF NOT EXISTS "
                } else {
                    ""
                };
                let columns: Vec<String> = index.columns.iter().map(|c| self.quote(c)).collect();
                format!(
                    "CREATE {unique}INDEX {if_not_exists}{} ON {} ({})",
                    self.quote(&index.name),
                    self.quote(&table.name),
                    columns.join(", ")
                )
            })
            .collect()
    }

    /// Generates `DROP TABLE`.
    fn drop_table(&self, table_name: &str, safe: bool) -> String {
        let if_exists = if safe { "IF EXISTS " } else { "" };
        format!("DROP TABLE {if_exists}{}", self.quote(table_name))
    }
}

fn char_length(column: &ColumnDef) -> u32 {
    column.max_length.unwrap_or(255)
}

// ── SQLite ───────────────────────────────────────────────────────────────

/// Schema editor for SQLite.
pub struct SqliteSchemaEditor;

impl SchemaEditor for SqliteSchemaEditor {
    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::SQLite
    }

    fn column_type_sql(&self, column: &ColumnDef) -> String {
        match column.ty {
            ColumnType::AutoField
            | ColumnType::BigAutoField
            | ColumnType::Integer
            | ColumnType::BigInteger
            | ColumnType::Boolean => "INTEGER".to_string(),
            ColumnType::Float => "REAL".to_string(),
            ColumnType::Char => format!("VARCHAR({})", char_length(column)),
            ColumnType::Text | ColumnType::Uuid | ColumnType::Json => "TEXT".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::DateTime => "DATETIME".to_string(),
            ColumnType::Blob => "BLOB".to_string(),
        }
    }

    fn auto_increment_sql(&self) -> &'static str {
        " AUTOINCREMENT"
    }
}

// ── PostgreSQL ───────────────────────────────────────────────────────────

/// Schema editor for PostgreSQL. Auto columns use `SERIAL` / `BIGSERIAL`.
pub struct PostgresSchemaEditor;

impl SchemaEditor for PostgresSchemaEditor {
    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::PostgreSQL
    }

    fn column_type_sql(&self, column: &ColumnDef) -> String {
        match column.ty {
            ColumnType::AutoField => "SERIAL".to_string(),
            ColumnType::BigAutoField => "BIGSERIAL".to_string(),
            ColumnType::Integer => "INTEGER".to_string(),
            ColumnType::BigInteger => "BIGINT".to_string(),
            ColumnType::Float => "DOUBLE PRECISION".to_string(),
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::Char => format!("VARCHAR({})", char_length(column)),
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::DateTime => "TIMESTAMP".to_string(),
            ColumnType::Uuid => "UUID".to_string(),
            ColumnType::Blob => "BYTEA".to_string(),
            ColumnType::Json => "JSONB".to_string(),
        }
    }

    fn auto_increment_sql(&self) -> &'static str {
        ""
    }

    fn bool_literal(&self, value: bool) -> &'static str {
        if value {
            "TRUE"
        } else {
            "FALSE"
        }
    }
}

// ── MySQL ────────────────────────────────────────────────────────────────

/// Schema editor for MySQL (InnoDB).
pub struct MySqlSchemaEditor;

impl SchemaEditor for MySqlSchemaEditor {
    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::MySQL
    }

    fn column_type_sql(&self, column: &ColumnDef) -> String {
        match column.ty {
            ColumnType::AutoField | ColumnType::Integer => "INTEGER".to_string(),
            ColumnType::BigAutoField | ColumnType::BigInteger => "BIGINT".to_string(),
            ColumnType::Float => "DOUBLE".to_string(),
            ColumnType::Boolean => "TINYINT(1)".to_string(),
            ColumnType::Char => format!("VARCHAR({})", char_length(column)),
            ColumnType::Text => "LONGTEXT".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::DateTime => "DATETIME(6)".to_string(),
            ColumnType::Uuid => "CHAR(36)".to_string(),
            ColumnType::Blob => "LONGBLOB".to_string(),
            ColumnType::Json => "JSON".to_string(),
        }
    }

    fn auto_increment_sql(&self) -> &'static str {
        " AUTO_INCREMENT"
    }
}

/// Returns the schema editor for a dialect.
pub fn schema_editor_for(backend: DatabaseBackendType) -> Box<dyn SchemaEditor> {
    match backend {
        DatabaseBackendType::SQLite => Box::new(SqliteSchemaEditor),
        DatabaseBackendType::PostgreSQL => Box::new(PostgresSchemaEditor),
        DatabaseBackendType::MySQL => Box::new(MySqlSchemaEditor),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{IndexDef, OnDelete};

    fn tweet() -> TableDef {
        TableDef::with_auto_id("tweet")
            .column(
                ColumnDef::foreign_key("user_id", "user")
                    .index()
                    .on_delete(OnDelete::Cascade),
            )
            .column(ColumnDef::new("content", ColumnType::Char).max_length(140))
            .column(ColumnDef::new("views", ColumnType::Integer).default_value(0))
            .column(ColumnDef::new("pinned", ColumnType::Boolean).default_value(false))
            .column(ColumnDef::new("edited", ColumnType::DateTime).null().default_now())
    }

    #[test]
    fn test_sqlite_create_table() {
        let sql = SqliteSchemaEditor.create_table(&tweet(), false);
        assert_eq!(
            sql,
            "CREATE TABLE \"tweet\" (\
             \"id\" INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT, \
             \"user_id\" INTEGER NOT NULL, \
             \"content\" VARCHAR(140) NOT NULL, \
             \"views\" INTEGER NOT NULL DEFAULT 0, \
             \"pinned\" INTEGER NOT NULL DEFAULT 0, \
             \"edited\" DATETIME, \
             FOREIGN KEY (\"user_id\") REFERENCES \"user\" (\"id\") ON DELETE CASCADE)"
        );
    }

    #[test]
    fn test_safe_create_and_drop() {
        let sql = SqliteSchemaEditor.create_table(&TableDef::with_auto_id("user"), true);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"user\""));
        assert_eq!(
            SqliteSchemaEditor.drop_table("user", true),
            "DROP TABLE IF EXISTS \"user\""
        );
        assert_eq!(SqliteSchemaEditor.drop_table("user", false), "DROP TABLE \"user\"");
    }

    #[test]
    fn test_postgres_types() {
        let sql = PostgresSchemaEditor.create_table(&tweet(), false);
        assert!(sql.contains("\"id\" SERIAL NOT NULL PRIMARY KEY"));
        assert!(sql.contains("\"pinned\" BOOLEAN NOT NULL DEFAULT FALSE"));
        assert!(sql.contains("\"edited\" TIMESTAMP,"));
    }

    #[test]
    fn test_mysql_backticks_and_auto_increment() {
        let sql = MySqlSchemaEditor.create_table(&tweet(), false);
        assert!(sql.starts_with("CREATE TABLE `tweet` (`id` INTEGER NOT NULL AUTO_INCREMENT PRIMARY KEY"));
        assert!(sql.contains("REFERENCES `user` (`id`) ON DELETE CASCADE"));
    }

    #[test]
    fn test_no_action_emits_no_clause() {
        let t = TableDef::with_auto_id("like").column(ColumnDef::foreign_key("tweet_id", "tweet"));
        let sql = SqliteSchemaEditor.create_table(&t, false);
        assert!(sql.ends_with("REFERENCES \"tweet\" (\"id\"))"));
    }

    #[test]
    fn test_foreign_key_to_non_pk_column() {
        let t = TableDef::with_auto_id("diba")
            .column(ColumnDef::new("a", ColumnType::Char).references("dia", "a"));
        let sql = SqliteSchemaEditor.create_table(&t, false);
        assert!(sql.contains("FOREIGN KEY (\"a\") REFERENCES \"dia\" (\"a\")"));
    }

    #[test]
    fn test_indexes() {
        let t = tweet().index(IndexDef::new("tweet_user_content", &["user_id", "content"], true));
        let stmts = SqliteSchemaEditor.create_indexes(&t, true);
        assert_eq!(
            stmts,
            vec![
                "CREATE UNIQUE INDEX IF NOT EXISTS \"tweet_user_content\" ON \"tweet\" (\"user_id\", \"content\")",
                "CREATE INDEX IF NOT EXISTS \"tweet_user_id\" ON \"tweet\" (\"user_id\")",
            ]
        );
        let mysql = MySqlSchemaEditor.create_indexes(&t, true);
        assert!(mysql[1].starts_with("CREATE INDEX `tweet_user_id`"));
    }

    #[test]
    fn test_string_default_is_escaped() {
        let col = ColumnDef::new("status", ColumnType::Text).default_value("it's new");
        assert_eq!(
            SqliteSchemaEditor.column_sql(&col),
            "\"status\" TEXT NOT NULL DEFAULT 'it''s new'"
        );
    }

    #[test]
    fn test_schema_editor_for() {
        for backend in [
            DatabaseBackendType::SQLite,
            DatabaseBackendType::PostgreSQL,
            DatabaseBackendType::MySQL,
        ] {
            assert_eq!(schema_editor_for(backend).backend_type(), backend);
        }
    }
}
