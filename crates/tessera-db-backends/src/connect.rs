//! Opening a [`Database`] from settings.

use std::sync::Arc;

use tessera_core::{DatabaseSettings, TesseraError, TesseraResult};
use tessera_db::{Database, DbExecutor};
use tracing::info;

/// Opens the backend named by `settings.engine`.
///
/// Engines other than the compiled-in ones fail with `ConfigurationError`.
///
/// # Examples
///
/// ```
/// use tessera_core::DatabaseSettings;
///
/// let db = tessera_db_backends::connect(&DatabaseSettings::sqlite_memory()).unwrap();
/// assert!(!db.is_closed());
/// ```
pub fn connect(settings: &DatabaseSettings) -> TesseraResult<Database> {
    let executor = open_executor(settings)?;
    let db = Database::new(executor);
    db.span()
        .in_scope(|| info!(engine = %settings.engine, name = %settings.name, "Opened connection"));
    Ok(db)
}

/// Parses `url` with [`DatabaseSettings::from_url`] and connects.
pub fn connect_url(url: &str) -> TesseraResult<Database> {
    connect(&DatabaseSettings::from_url(url)?)
}

fn open_executor(settings: &DatabaseSettings) -> TesseraResult<Arc<dyn DbExecutor>> {
    if settings.is_sqlite() {
        return open_sqlite(settings);
    }
    Err(TesseraError::ConfigurationError(format!(
        "Database engine '{}' is not supported by this build",
        settings.engine
    )))
}

#[cfg(feature = "sqlite")]
fn open_sqlite(settings: &DatabaseSettings) -> TesseraResult<Arc<dyn DbExecutor>> {
    let backend = crate::sqlite::SqliteBackend::open(&settings.name, &settings.options)?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "sqlite"))]
fn open_sqlite(_settings: &DatabaseSettings) -> TesseraResult<Arc<dyn DbExecutor>> {
    Err(TesseraError::ConfigurationError(
        "SQLite support is not compiled in; enable the `sqlite` feature".to_string(),
    ))
}
