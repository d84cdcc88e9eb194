//! # tessera
//!
//! An async ORM core. This meta-crate re-exports the sub-crates; depend on
//! them individually for finer-grained control.
//!
//! ```rust,no_run
//! use tessera::core::DatabaseSettings;
//! use tessera::db::{ColumnDef, ColumnType, DeleteOptions, TableDef};
//!
//! # async fn run() -> tessera::core::TesseraResult<()> {
//! let db = tessera::db_backends::connect(&DatabaseSettings::sqlite_memory())?;
//! db.create_tables(
//!     &[
//!         TableDef::with_auto_id("tweet").column(ColumnDef::foreign_key("user_id", "user")),
//!         TableDef::with_auto_id("user").column(ColumnDef::new("username", ColumnType::Text)),
//!     ],
//!     true,
//! )
//! .await?;
//! let ada = db.insert("user", &[("username", "ada".into())]).await?;
//! db.delete_instance(&ada, DeleteOptions::recursive()).await?;
//! db.close().await?;
//! # Ok(())
//! # }
//! ```

/// Errors, settings and logging setup.
pub use tessera_core as core;

/// Schema definitions, transactions, cascade deletes and CRUD.
pub use tessera_db as db;

/// Store backends and `connect`.
pub use tessera_db_backends as db_backends;

/// Management commands (CLI).
#[cfg(feature = "cli")]
pub use tessera_cli as cli;

pub use tessera_core::{TesseraError, TesseraResult};
pub use tessera_db::{Database, Value};
