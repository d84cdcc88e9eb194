//! # tessera-db
//!
//! The ORM core of tessera. It owns the mechanisms underneath any query
//! layer: a per-connection stack of transaction frames, a resolver that
//! orders tables by their foreign keys, recursive cascade deletes over the
//! reverse foreign-key graph, and a small row-level CRUD API.
//!
//! ## Module Overview
//!
//! - [`value`] - The backend-agnostic [`Value`] enum
//! - [`row`] - Result rows and typed column access
//! - [`executor`] - The async [`DbExecutor`] trait and [`Cursor`]
//! - [`schema`] - Table, column and foreign-key definitions, plus the [`Schema`] registry
//! - [`resolver`] - Dependency ordering of tables
//! - [`ddl`] - `CREATE TABLE` / `DROP TABLE` generation per dialect
//! - [`compiler`] - Parameterized CRUD statements
//! - [`transactions`] - Nested transactions and savepoints
//! - [`model`] - Row instances
//! - [`cascade`] - Recursive deletes
//! - [`database`] - The [`Database`] connection that ties it together

// too_many_lines: DDL generation and the cascade walk are long match-heavy functions
// result_large_err: TesseraError is the single error type and is used everywhere
// format_push_string: format! with push_str reads better for SQL generation
// significant_drop_tightening: false positives with async Mutex guards
#![allow(clippy::too_many_lines)]
#![allow(clippy::result_large_err)]
#![allow(clippy::format_push_string)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::struct_excessive_bools)]

pub mod cascade;
pub mod compiler;
pub mod database;
pub mod ddl;
pub mod executor;
pub mod model;
pub mod resolver;
pub mod row;
pub mod schema;
pub mod transactions;
pub mod value;

pub use cascade::{cascade_delete, plan_cascade, CascadeReport, DeleteOptions, DeletePlan};
pub use compiler::{Filter, SqlCompiler};
pub use database::Database;
pub use ddl::{schema_editor_for, MySqlSchemaEditor, PostgresSchemaEditor, SchemaEditor, SqliteSchemaEditor};
pub use executor::{Cursor, DatabaseBackendType, DbExecutor};
pub use model::Instance;
pub use resolver::{order_for_creation, order_for_drop, DependencyGraph};
pub use row::{FromValue, Row};
pub use schema::{
    ColumnDef, ColumnDefault, ColumnType, ForeignKey, IndexDef, OnDelete, ReverseEdge, Schema,
    TableDef,
};
pub use transactions::{atomic, FrameHandle, Transaction, TransactionManager};
pub use value::Value;
