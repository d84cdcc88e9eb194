//! Error types for tessera.
//!
//! [`TesseraError`] is the single error enum used across the workspace. Each
//! variant names one failure kind a caller may want to match on: lookups
//! that found nothing, constraint violations reported by the store,
//! transaction-protocol misuse, and foreign-key cycles.

use thiserror::Error;

/// The error type for every tessera operation.
#[derive(Error, Debug)]
pub enum TesseraError {
    // ── Lookup ───────────────────────────────────────────────────────

    /// A lookup expected a row but matched none.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A lookup expected exactly one row but matched several.
    #[error("Multiple rows returned when one expected: {0}")]
    MultipleObjectsReturned(String),

    // ── Integrity ────────────────────────────────────────────────────

    /// A referential-integrity or uniqueness constraint was violated.
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// A transaction frame was closed out of order, or a frame was left open.
    #[error("Transaction protocol error: {0}")]
    ProtocolError(String),

    /// The foreign-key graph contains a cycle between distinct tables.
    #[error("Circular foreign key dependency between tables: {}", tables.join(", "))]
    CycleError {
        /// The tables that could not be ordered, sorted by name.
        tables: Vec<String>,
    },

    /// A table definition is invalid or refers to something that does not exist.
    #[error("Schema error: {0}")]
    SchemaError(String),

    // ── Database ─────────────────────────────────────────────────────

    /// A statement failed for a reason not covered by another variant.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// The connection could not be opened, was closed, or failed to close.
    #[error("Operational error: {0}")]
    OperationalError(String),

    // ── Configuration ────────────────────────────────────────────────

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Settings or schema files could not be decoded.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl TesseraError {
    /// Returns `true` for [`TesseraError::NotFound`].
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns `true` for [`TesseraError::ConstraintViolation`].
    pub const fn is_constraint_violation(&self) -> bool {
        matches!(self, Self::ConstraintViolation(_))
    }

    /// Returns `true` for [`TesseraError::ProtocolError`].
    pub const fn is_protocol_error(&self) -> bool {
        matches!(self, Self::ProtocolError(_))
    }

    /// A short, stable name for the error kind, used in log fields.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::MultipleObjectsReturned(_) => "multiple_objects_returned",
            Self::ConstraintViolation(_) => "constraint_violation",
            Self::ProtocolError(_) => "protocol_error",
            Self::CycleError { .. } => "cycle_error",
            Self::SchemaError(_) => "schema_error",
            Self::DatabaseError(_) => "database_error",
            Self::OperationalError(_) => "operational_error",
            Self::ConfigurationError(_) => "configuration_error",
            Self::SerializationError(_) => "serialization_error",
            Self::IoError(_) => "io_error",
        }
    }
}

/// A convenience type alias for `Result<T, TesseraError>`.
pub type TesseraResult<T> = Result<T, TesseraError>;
