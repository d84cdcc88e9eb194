//! The `sql` management command: runs one raw statement and prints its
//! result.

use async_trait::async_trait;
use tessera_core::{Settings, TesseraError, TesseraResult};
use tessera_db::{Cursor, Value};
use tracing::debug;

use crate::command::ManagementCommand;

/// Parses a `--param` value.
///
/// `null`, `true` and `false` are literals, anything numeric becomes an
/// integer or float, and everything else is text. A leading `=` forces text,
/// so `=42` binds the string `"42"`.
pub fn parse_param(raw: &str) -> Value {
    if let Some(text) = raw.strip_prefix('=') {
        return Value::String(text.to_string());
    }
    match raw {
        "null" | "NULL" => return Value::Null,
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Int(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if f.is_finite() {
            return Value::Float(f);
        }
    }
    Value::String(raw.to_string())
}

fn cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Renders the cursor as tab-separated lines: a header, one line per row,
/// then a row count. Statements without a result set render as a single
/// summary line.
pub fn format_rows(cursor: &mut Cursor) -> Vec<String> {
    if cursor.columns().is_empty() {
        let mut summary = format!("{} row(s) affected", cursor.rows_affected());
        if let Some(id) = cursor.last_insert_id() {
            summary.push_str(&format!(", last insert id {}", cell(id)));
        }
        return vec![summary];
    }

    let mut lines = vec![cursor.columns().join("\t")];
    let rows = cursor.fetch_all();
    for row in &rows {
        let cells: Vec<String> = row.values().iter().map(cell).collect();
        lines.push(cells.join("\t"));
    }
    lines.push(format!("({} row(s))", rows.len()));
    lines
}

/// Runs a statement against a configured database.
pub struct SqlCommand;

#[async_trait]
impl ManagementCommand for SqlCommand {
    fn name(&self) -> &'static str {
        "sql"
    }

    fn help(&self) -> &'static str {
        "Execute a raw SQL statement"
    }

    fn add_arguments(&self, cmd: clap::Command) -> clap::Command {
        cmd.arg(
            clap::Arg::new("statement")
                .required(true)
                .help("SQL with ? placeholders"),
        )
        .arg(
            clap::Arg::new("param")
                .long("param")
                .short('p')
                .action(clap::ArgAction::Append)
                .help("Bind a parameter, in order; prefix with = to force text"),
        )
        .arg(
            clap::Arg::new("database")
                .long("database")
                .default_value("default")
                .help("Database alias to run against"),
        )
    }

    async fn handle(&self, matches: &clap::ArgMatches, settings: &Settings) -> TesseraResult<()> {
        let statement = matches
            .get_one::<String>("statement")
            .ok_or_else(|| TesseraError::ConfigurationError("No statement given".to_string()))?;
        let params: Vec<Value> = matches
            .get_many::<String>("param")
            .map(|vals| vals.map(|v| parse_param(v)).collect())
            .unwrap_or_default();
        let alias = matches
            .get_one::<String>("database")
            .map_or("default", String::as_str);

        let db = tessera_db_backends::connect(settings.database(alias)?)?;
        debug!(database = alias, params = params.len(), "Running statement");
        let result = db.execute_sql(statement, &params, true).await;
        db.close().await?;
        for line in format_rows(&mut result?) {
            println!("{line}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_db::Row;

    #[test]
    fn test_parse_param() {
        assert_eq!(parse_param("null"), Value::Null);
        assert_eq!(parse_param("true"), Value::Bool(true));
        assert_eq!(parse_param("-12"), Value::Int(-12));
        assert_eq!(parse_param("2.5"), Value::Float(2.5));
        assert_eq!(parse_param("ada"), Value::from("ada"));
        assert_eq!(parse_param("=42"), Value::from("42"));
        assert_eq!(parse_param("inf"), Value::from("inf"));
    }

    #[test]
    fn test_format_rows() {
        let mut cursor = Cursor::from_rows(
            vec!["id".to_string(), "username".to_string()],
            vec![
                Row::new(
                    vec!["id".to_string(), "username".to_string()],
                    vec![Value::Int(1), Value::from("ada")],
                ),
                Row::new(
                    vec!["id".to_string(), "username".to_string()],
                    vec![Value::Int(2), Value::Null],
                ),
            ],
        );
        assert_eq!(
            format_rows(&mut cursor),
            vec!["id\tusername", "1\tada", "2\tNULL", "(2 row(s))"]
        );
    }

    #[test]
    fn test_format_execution_summary() {
        let mut cursor = Cursor::from_execution(1, Some(Value::Int(7)));
        assert_eq!(
            format_rows(&mut cursor),
            vec!["1 row(s) affected, last insert id 7"]
        );
        let mut cursor = Cursor::from_execution(3, None);
        assert_eq!(format_rows(&mut cursor), vec!["3 row(s) affected"]);
    }

    #[tokio::test]
    async fn test_handle_writes_to_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.db");
        let mut settings = Settings::default();
        settings.databases.insert(
            "default".to_string(),
            tessera_core::DatabaseSettings::sqlite_file(path.to_string_lossy()),
        );

        let cmd = SqlCommand;
        let parse = |args: &[&str]| {
            cmd.add_arguments(clap::Command::new("sql"))
                .try_get_matches_from(args)
                .unwrap()
        };
        cmd.handle(&parse(&["sql", "CREATE TABLE note (id INTEGER PRIMARY KEY, body TEXT)"]), &settings)
            .await
            .unwrap();
        cmd.handle(
            &parse(&["sql", "INSERT INTO note (body) VALUES (?)", "--param", "=1"]),
            &settings,
        )
        .await
        .unwrap();

        let err = cmd
            .handle(&parse(&["sql", "SELECT 1", "--database", "missing"]), &settings)
            .await
            .unwrap_err();
        assert!(matches!(err, TesseraError::ConfigurationError(_)));

        let db = tessera_db_backends::connect(&settings.default_database()).unwrap();
        let mut cursor = db.execute_sql("SELECT body FROM note", &[], true).await.unwrap();
        let body: String = cursor.fetch_one().unwrap().get("body").unwrap();
        assert_eq!(body, "1");
    }
}
