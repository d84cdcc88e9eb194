//! Settings loading from configuration files and the environment.
//!
//! ## Loading Order
//!
//! 1. Start with default settings.
//! 2. Deep-merge a TOML or JSON file over them.
//! 3. Apply environment variable overrides (highest priority).
//!
//! ## Environment Variables
//!
//! | Env Var | Setting |
//! |---|---|
//! | `TESSERA_DEBUG` | `debug` |
//! | `TESSERA_LOG_LEVEL` | `log_level` |
//! | `TESSERA_LOG_FORMAT` | `log_format` (`pretty`, `compact`, `json`) |
//! | `TESSERA_DATABASE_URL` | `databases.default`, parsed as a URL |
//!
//! ## Examples
//!
//! ```rust,no_run
//! use tessera_core::settings_loader;
//!
//! let settings = settings_loader::from_toml_file_with_env("tessera.toml").unwrap();
//! ```

use std::path::Path;

use crate::error::TesseraError;
use crate::settings::{DatabaseSettings, LogFormat, Settings, DEFAULT_DB_ALIAS};

/// Loads settings from a TOML string, keeping defaults for anything unset.
pub fn from_toml_str(toml_str: &str) -> Result<Settings, TesseraError> {
    let toml_value: toml::Value = toml::from_str(toml_str)
        .map_err(|e| TesseraError::SerializationError(format!("Failed to parse TOML: {e}")))?;
    merge_over_defaults(toml_to_json(toml_value), "TOML")
}

/// Loads settings from a TOML file.
pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Settings, TesseraError> {
    from_toml_str(&read_file(path.as_ref())?)
}

/// Loads settings from a TOML file, then applies environment overrides.
pub fn from_toml_file_with_env(path: impl AsRef<Path>) -> Result<Settings, TesseraError> {
    let mut settings = from_toml_file(path)?;
    apply_env_overrides(&mut settings)?;
    Ok(settings)
}

/// Loads settings from a JSON string, keeping defaults for anything unset.
pub fn from_json_str(json_str: &str) -> Result<Settings, TesseraError> {
    let json_value: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| TesseraError::SerializationError(format!("Failed to parse JSON: {e}")))?;
    merge_over_defaults(json_value, "JSON")
}

/// Loads settings from a JSON file.
pub fn from_json_file(path: impl AsRef<Path>) -> Result<Settings, TesseraError> {
    from_json_str(&read_file(path.as_ref())?)
}

/// Loads a file by extension (`.json` as JSON, anything else as TOML) and
/// applies environment overrides.
pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Settings, TesseraError> {
    let path = path.as_ref();
    let mut settings = if path.extension().is_some_and(|ext| ext == "json") {
        from_json_file(path)?
    } else {
        from_toml_file(path)?
    };
    apply_env_overrides(&mut settings)?;
    Ok(settings)
}

/// Loads settings from environment variables only, starting from defaults.
pub fn from_env() -> Result<Settings, TesseraError> {
    let mut settings = Settings::default();
    apply_env_overrides(&mut settings)?;
    Ok(settings)
}

/// Applies `TESSERA_*` environment variables to `settings`.
pub fn apply_env_overrides(settings: &mut Settings) -> Result<(), TesseraError> {
    apply_overrides_from(settings, |key| std::env::var(key).ok())
}

/// Applies overrides read through `lookup`, which maps a variable name to its value.
pub fn apply_overrides_from<F>(settings: &mut Settings, lookup: F) -> Result<(), TesseraError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("TESSERA_DEBUG") {
        settings.debug = matches!(val.to_lowercase().as_str(), "true" | "1" | "yes");
    }

    if let Some(val) = lookup("TESSERA_LOG_LEVEL") {
        settings.log_level = val;
    }

    if let Some(val) = lookup("TESSERA_LOG_FORMAT") {
        settings.log_format = match val.to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            "json" => LogFormat::Json,
            other => {
                return Err(TesseraError::ConfigurationError(format!(
                    "Unknown TESSERA_LOG_FORMAT '{other}'"
                )))
            }
        };
    }

    if let Some(val) = lookup("TESSERA_DATABASE_URL") {
        let db = DatabaseSettings::from_url(&val)?;
        settings.databases.insert(DEFAULT_DB_ALIAS.to_string(), db);
    }

    Ok(())
}

// ============================================================
// Helpers
// ============================================================

fn read_file(path: &Path) -> Result<String, TesseraError> {
    std::fs::read_to_string(path).map_err(|e| {
        TesseraError::ConfigurationError(format!(
            "Failed to read settings file '{}': {e}",
            path.display()
        ))
    })
}

fn merge_over_defaults(value: serde_json::Value, format: &str) -> Result<Settings, TesseraError> {
    let default_json = serde_json::to_value(Settings::default()).map_err(|e| {
        TesseraError::SerializationError(format!("Failed to serialize default settings: {e}"))
    })?;
    let merged = merge_json(default_json, value);
    serde_json::from_value(merged).map_err(|e| {
        TesseraError::SerializationError(format!("Invalid settings in {format}: {e}"))
    })
}

/// Converts a TOML value to a `serde_json::Value`.
fn toml_to_json(value: toml::Value) -> serde_json::Value {
    match value {
        toml::Value::String(s) => serde_json::Value::String(s),
        toml::Value::Integer(i) => serde_json::json!(i),
        toml::Value::Float(f) => serde_json::json!(f),
        toml::Value::Boolean(b) => serde_json::Value::Bool(b),
        toml::Value::Datetime(dt) => serde_json::Value::String(dt.to_string()),
        toml::Value::Array(arr) => {
            serde_json::Value::Array(arr.into_iter().map(toml_to_json).collect())
        }
        toml::Value::Table(table) => serde_json::Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}

/// Deep-merges two JSON values. `override_val` wins on conflicts.
fn merge_json(base: serde_json::Value, override_val: serde_json::Value) -> serde_json::Value {
    match (base, override_val) {
        (serde_json::Value::Object(mut base_map), serde_json::Value::Object(override_map)) => {
            for (key, override_v) in override_map {
                let merged = if let Some(base_v) = base_map.remove(&key) {
                    merge_json(base_v, override_v)
                } else {
                    override_v
                };
                base_map.insert(key, merged);
            }
            serde_json::Value::Object(base_map)
        }
        (_, override_val) => override_val,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_from_toml_str_basic() {
        let settings = from_toml_str(
            r#"
            debug = true
            log_level = "tessera=debug"
            log_format = "json"
        "#,
        )
        .unwrap();
        assert!(settings.debug);
        assert_eq!(settings.log_level, "tessera=debug");
        assert_eq!(settings.log_format, LogFormat::Json);
        assert_eq!(settings.default_database().name, ":memory:");
    }

    #[test]
    fn test_from_toml_str_databases_keep_default_entry() {
        let settings = from_toml_str(
            r#"
            [databases.replica]
            name = "replica.db"
        "#,
        )
        .unwrap();
        assert_eq!(settings.databases.len(), 2);
        let replica = settings.database("replica").unwrap();
        assert_eq!(replica.name, "replica.db");
        assert_eq!(replica.engine, "sqlite");
    }

    #[test]
    fn test_from_toml_str_pragmas() {
        let settings = from_toml_str(
            r#"
            [databases.default]
            name = "app.db"
            [databases.default.options]
            journal_mode = "wal"
        "#,
        )
        .unwrap();
        let db = settings.default_database();
        assert_eq!(db.name, "app.db");
        assert_eq!(db.options.get("journal_mode").map(String::as_str), Some("wal"));
    }

    #[test]
    fn test_from_toml_str_empty_gives_defaults() {
        assert_eq!(from_toml_str("").unwrap(), Settings::default());
    }

    #[test]
    fn test_from_toml_str_invalid() {
        let err = from_toml_str("[[invalid toml").unwrap_err();
        assert!(matches!(err, TesseraError::SerializationError(_)));
    }

    #[test]
    fn test_from_json_str_type_mismatch() {
        let err = from_json_str(r#"{"debug": "sometimes"}"#).unwrap_err();
        assert!(matches!(err, TesseraError::SerializationError(_)));
    }

    #[test]
    fn test_from_json_str_basic() {
        let settings = from_json_str(r#"{"log_level": "warn"}"#).unwrap();
        assert_eq!(settings.log_level, "warn");
        assert!(!settings.debug);
    }

    #[test]
    fn test_overrides() {
        let mut settings = Settings::default();
        apply_overrides_from(
            &mut settings,
            env(&[
                ("TESSERA_DEBUG", "yes"),
                ("TESSERA_LOG_LEVEL", "trace"),
                ("TESSERA_LOG_FORMAT", "pretty"),
                ("TESSERA_DATABASE_URL", "sqlite:///override.db"),
            ]),
        )
        .unwrap();
        assert!(settings.debug);
        assert_eq!(settings.log_level, "trace");
        assert_eq!(settings.log_format, LogFormat::Pretty);
        assert_eq!(settings.default_database().name, "override.db");
    }

    #[test]
    fn test_overrides_reject_bad_values() {
        let mut settings = Settings::default();
        assert!(apply_overrides_from(&mut settings, env(&[("TESSERA_LOG_FORMAT", "xml")])).is_err());
        assert!(
            apply_overrides_from(&mut settings, env(&[("TESSERA_DATABASE_URL", "ftp://x/y")]))
                .is_err()
        );
    }

    #[test]
    fn test_from_toml_and_json_files() {
        let dir = tempfile::tempdir().unwrap();

        let toml_path = dir.path().join("tessera.toml");
        let mut f = std::fs::File::create(&toml_path).unwrap();
        writeln!(f, "log_level = \"debug\"").unwrap();
        assert_eq!(from_toml_file(&toml_path).unwrap().log_level, "debug");

        let json_path = dir.path().join("tessera.json");
        std::fs::write(&json_path, r#"{"log_level": "error"}"#).unwrap();
        assert_eq!(from_json_file(&json_path).unwrap().log_level, "error");
    }

    #[test]
    fn test_missing_file() {
        let err = from_toml_file("/nonexistent/tessera.toml").unwrap_err();
        assert!(matches!(err, TesseraError::ConfigurationError(_)));
    }
}
