//! # tessera-db-backends
//!
//! Store drivers for tessera. Each backend implements
//! [`DbExecutor`](tessera_db::DbExecutor); [`connect`] picks one from
//! [`DatabaseSettings`](tessera_core::DatabaseSettings) and wraps it in a
//! [`Database`](tessera_db::Database).
//!
//! Supported backends:
//! - `SQLite` (feature `sqlite`, on by default)

pub mod connect;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use connect::{connect, connect_url};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBackend;
