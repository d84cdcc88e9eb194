//! Built-in management commands. Each implements
//! [`ManagementCommand`](crate::command::ManagementCommand).

pub mod profile;
pub mod schema;
pub mod sql;

pub use profile::ProfileCommand;
pub use schema::SchemaCommand;
pub use sql::SqlCommand;

use crate::command::CommandRegistry;

/// Registers all built-in management commands into the given registry.
pub fn register_builtin_commands(registry: &mut CommandRegistry) {
    registry.register(Box::new(SchemaCommand));
    registry.register(Box::new(SqlCommand));
    registry.register(Box::new(ProfileCommand));
}
