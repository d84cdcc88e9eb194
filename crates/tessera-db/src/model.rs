//! Row instances.
//!
//! An [`Instance`] is one row of a registered table held in memory. Before
//! its first save it has no identity; once persisted, the primary key value
//! is fixed and attempts to change it are rejected.

use tessera_core::{TesseraError, TesseraResult};

use crate::row::{FromValue, Row};
use crate::schema::TableDef;
use crate::value::Value;

/// One row of a table, keyed by column name.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    table: String,
    pk_column: String,
    values: Vec<(String, Value)>,
    identity: Option<Value>,
}

impl Instance {
    /// An unsaved instance of `table` with no values.
    pub fn new(table: &TableDef) -> TesseraResult<Self> {
        Ok(Self {
            table: table.name.clone(),
            pk_column: table.primary_key()?.name.clone(),
            values: Vec::new(),
            identity: None,
        })
    }

    /// A persisted instance built from a fetched row.
    pub fn from_row(table: &TableDef, row: Row) -> TesseraResult<Self> {
        let pk_column = table.primary_key()?.name.clone();
        let identity = row
            .get_value(&pk_column)
            .filter(|value| !value.is_null())
            .cloned()
            .ok_or_else(|| {
                TesseraError::SchemaError(format!(
                    "Row for '{}' has no primary key value for '{pk_column}'",
                    table.name
                ))
            })?;
        Ok(Self {
            table: table.name.clone(),
            pk_column,
            values: row.into_pairs(),
            identity: Some(identity),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn pk_column(&self) -> &str {
        &self.pk_column
    }

    /// The primary key value, present once the instance has been saved.
    pub const fn pk(&self) -> Option<&Value> {
        self.identity.as_ref()
    }

    pub const fn is_persisted(&self) -> bool {
        self.identity.is_some()
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Gets a typed column value. A column never set reads as an error.
    pub fn get_as<T: FromValue>(&self, column: &str) -> TesseraResult<T> {
        let value = self.get(column).ok_or_else(|| {
            TesseraError::SchemaError(format!("'{}' has no value for '{column}'", self.table))
        })?;
        T::from_value(value)
    }

    /// Sets a column value.
    ///
    /// Changing the primary key of a persisted instance is a `SchemaError`.
    pub fn set(&mut self, column: &str, value: impl Into<Value>) -> TesseraResult<()> {
        let value = value.into();
        if column == self.pk_column {
            if let Some(identity) = &self.identity {
                if *identity != value {
                    return Err(TesseraError::SchemaError(format!(
                        "Cannot change primary key of persisted '{}' row from {identity} to {value}",
                        self.table
                    )));
                }
            }
        }
        match self.values.iter_mut().find(|(name, _)| name == column) {
            Some((_, slot)) => *slot = value,
            None => self.values.push((column.to_string(), value)),
        }
        Ok(())
    }

    /// Column values in the order they were set or fetched.
    pub fn values(&self) -> &[(String, Value)] {
        &self.values
    }

    /// Values of every column except the primary key.
    pub fn non_pk_values(&self) -> Vec<(String, Value)> {
        self.values
            .iter()
            .filter(|(name, _)| *name != self.pk_column)
            .cloned()
            .collect()
    }

    /// Records the identity assigned by the store on first save.
    pub(crate) fn mark_persisted(&mut self, pk: Value) {
        match self.values.iter_mut().find(|(name, _)| *name == self.pk_column) {
            Some((_, slot)) => *slot = pk.clone(),
            None => self.values.push((self.pk_column.clone(), pk.clone())),
        }
        self.identity = Some(pk);
    }
}
