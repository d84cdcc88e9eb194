//! # tessera-cli
//!
//! Management commands for tessera and the `tessera` binary.
//!
//! - **Command framework** - [`ManagementCommand`] and [`CommandRegistry`]
//! - **Built-in commands** - `schema` (creation order and DDL of a TOML
//!   schema file), `sql` (raw statements) and `profile` (timed CRUD and
//!   cascade deletes on in-memory SQLite)
//!
//! ```rust
//! use tessera_cli::command::CommandRegistry;
//! use tessera_cli::commands::register_builtin_commands;
//!
//! let mut registry = CommandRegistry::new();
//! register_builtin_commands(&mut registry);
//! assert!(registry.list_commands().contains(&"schema"));
//! ```

// result_large_err: TesseraError is the workspace-wide error type
// unused_async: command handlers keep one async signature
#![allow(clippy::result_large_err)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::unused_async)]

pub mod command;
pub mod commands;

pub use command::{CommandRegistry, ManagementCommand};
pub use commands::register_builtin_commands;
