//! The `schema` management command.
//!
//! Reads table definitions from a TOML file, prints their creation order
//! and DDL for a dialect, and with `--apply` creates them on the configured
//! database.
//!
//! ```toml
//! [[table]]
//! name = "user"
//! columns = [
//!     { name = "id", type = "auto_field", primary_key = true },
//!     { name = "username", type = "char", max_length = 50, unique = true },
//! ]
//!
//! [[table]]
//! name = "tweet"
//! columns = [
//!     { name = "id", type = "auto_field", primary_key = true },
//!     { name = "user_id", type = "integer", references = { table = "user" } },
//! ]
//! ```

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tessera_core::{Settings, TesseraError, TesseraResult};
use tessera_db::{order_for_creation, schema_editor_for, DatabaseBackendType, TableDef};
use tracing::info;

use crate::command::ManagementCommand;

#[derive(Debug, Deserialize)]
struct SchemaFile {
    #[serde(default, rename = "table")]
    tables: Vec<TableDef>,
}

/// Parses `[[table]]` entries from TOML and validates each one.
pub fn parse_schema(source: &str) -> TesseraResult<Vec<TableDef>> {
    let file: SchemaFile = toml::from_str(source)
        .map_err(|e| TesseraError::SerializationError(format!("Invalid schema file: {e}")))?;
    for table in &file.tables {
        table.validate()?;
    }
    Ok(file.tables)
}

pub fn load_schema_file(path: impl AsRef<Path>) -> TesseraResult<Vec<TableDef>> {
    let source = std::fs::read_to_string(path)?;
    parse_schema(&source)
}

/// The DDL for `tables` in creation order: every `CREATE TABLE`, then every
/// index.
pub fn render_ddl(
    tables: &[TableDef],
    backend: DatabaseBackendType,
    safe: bool,
) -> TesseraResult<Vec<String>> {
    let ordered = order_for_creation(tables)?;
    let editor = schema_editor_for(backend);
    let mut statements: Vec<String> = ordered.iter().map(|t| editor.create_table(t, safe)).collect();
    for table in &ordered {
        statements.extend(editor.create_indexes(table, safe));
    }
    Ok(statements)
}

/// Prints or applies a schema file.
pub struct SchemaCommand;

#[async_trait]
impl ManagementCommand for SchemaCommand {
    fn name(&self) -> &'static str {
        "schema"
    }

    fn help(&self) -> &'static str {
        "Show the creation order and DDL of a schema file"
    }

    fn add_arguments(&self, cmd: clap::Command) -> clap::Command {
        cmd.arg(
            clap::Arg::new("file")
                .required(true)
                .help("TOML file with [[table]] definitions"),
        )
        .arg(
            clap::Arg::new("dialect")
                .long("dialect")
                .default_value("sqlite")
                .value_parser(["sqlite", "postgresql", "mysql"])
                .help("SQL dialect to render"),
        )
        .arg(
            clap::Arg::new("safe")
                .long("safe")
                .action(clap::ArgAction::SetTrue)
                .help("Add IF NOT EXISTS"),
        )
        .arg(
            clap::Arg::new("apply")
                .long("apply")
                .action(clap::ArgAction::SetTrue)
                .help("Create the tables on the configured database"),
        )
        .arg(
            clap::Arg::new("database")
                .long("database")
                .default_value("default")
                .help("Database alias used with --apply"),
        )
    }

    async fn handle(&self, matches: &clap::ArgMatches, settings: &Settings) -> TesseraResult<()> {
        let file = matches
            .get_one::<String>("file")
            .ok_or_else(|| TesseraError::ConfigurationError("No schema file given".to_string()))?;
        let dialect = matches
            .get_one::<String>("dialect")
            .map_or("sqlite", String::as_str);
        let safe = matches.get_flag("safe");

        let tables = load_schema_file(file)?;
        let backend = DatabaseBackendType::from_name(dialect)?;
        let order: Vec<&str> = order_for_creation(&tables)?
            .into_iter()
            .map(|t| t.name.as_str())
            .collect();
        println!("-- creation order: {}", order.join(", "));
        for statement in render_ddl(&tables, backend, safe)? {
            println!("{statement};");
        }

        if matches.get_flag("apply") {
            let alias = matches
                .get_one::<String>("database")
                .map_or("default", String::as_str);
            let db = tessera_db_backends::connect(settings.database(alias)?)?;
            let created = db.create_tables(&tables, safe).await?;
            info!(database = alias, tables = created.len(), "Applied schema");
            db.close().await?;
        }
        Ok(())
    }
}
