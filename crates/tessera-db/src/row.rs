//! Result rows and typed column access.

use tessera_core::{TesseraError, TesseraResult};

use crate::value::Value;

/// One fetched row: column names paired with their values.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Creates a row from column names and values.
    ///
    /// # Panics
    ///
    /// Panics if the number of columns does not match the number of values.
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        assert_eq!(
            columns.len(),
            values.len(),
            "Row column count must match value count"
        );
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Gets a typed value by column name.
    pub fn get<T: FromValue>(&self, column: &str) -> TesseraResult<T> {
        let value = self.get_value(column).ok_or_else(|| {
            TesseraError::DatabaseError(format!("Column '{column}' not found in row"))
        })?;
        T::from_value(value)
    }

    /// Gets a typed value by column position.
    pub fn get_by_index<T: FromValue>(&self, idx: usize) -> TesseraResult<T> {
        let value = self.values.get(idx).ok_or_else(|| {
            TesseraError::DatabaseError(format!(
                "Column index {idx} out of bounds (row has {} columns)",
                self.values.len()
            ))
        })?;
        T::from_value(value)
    }

    /// Returns the raw value of a column, if present.
    pub fn get_value(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| &self.values[idx])
    }

    /// Iterates over `(column, value)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    /// Consumes the row into `(column, value)` pairs.
    pub fn into_pairs(self) -> Vec<(String, Value)> {
        self.columns.into_iter().zip(self.values).collect()
    }
}

/// Conversion from a [`Value`] to a concrete Rust type.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> TesseraResult<Self>;
}

fn mismatch(expected: &str, value: &Value) -> TesseraError {
    TesseraError::DatabaseError(format!("Expected {expected}, got {value:?}"))
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> TesseraResult<Self> {
        match value {
            Value::Int(i) => Ok(*i),
            Value::Bool(b) => Ok(Self::from(*b)),
            _ => Err(mismatch("Int", value)),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> TesseraResult<Self> {
        match value {
            Value::Int(i) => Self::try_from(*i).map_err(|e| {
                TesseraError::DatabaseError(format!("Int value out of i32 range: {e}"))
            }),
            _ => Err(mismatch("Int", value)),
        }
    }
}

impl FromValue for u64 {
    fn from_value(value: &Value) -> TesseraResult<Self> {
        match value {
            Value::Int(i) => Self::try_from(*i).map_err(|e| {
                TesseraError::DatabaseError(format!("Int value out of u64 range: {e}"))
            }),
            _ => Err(mismatch("Int", value)),
        }
    }
}

impl FromValue for f64 {
    #[allow(clippy::cast_precision_loss)]
    fn from_value(value: &Value) -> TesseraResult<Self> {
        match value {
            Value::Float(f) => Ok(*f),
            Value::Int(i) => Ok(*i as f64),
            _ => Err(mismatch("Float", value)),
        }
    }
}

impl FromValue for bool {
    /// SQLite has no boolean storage class, so `0` and `1` are accepted.
    fn from_value(value: &Value) -> TesseraResult<Self> {
        match value {
            Value::Bool(b) => Ok(*b),
            Value::Int(0) => Ok(false),
            Value::Int(1) => Ok(true),
            _ => Err(mismatch("Bool", value)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> TesseraResult<Self> {
        match value {
            Value::String(s) => Ok(s.clone()),
            _ => Err(mismatch("String", value)),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> TesseraResult<Self> {
        match value {
            Value::Bytes(b) => Ok(b.clone()),
            _ => Err(mismatch("Bytes", value)),
        }
    }
}

impl FromValue for uuid::Uuid {
    fn from_value(value: &Value) -> TesseraResult<Self> {
        match value {
            Value::Uuid(u) => Ok(*u),
            Value::String(s) => s
                .parse()
                .map_err(|e| TesseraError::DatabaseError(format!("Invalid UUID '{s}': {e}"))),
            _ => Err(mismatch("Uuid", value)),
        }
    }
}

impl FromValue for chrono::NaiveDate {
    fn from_value(value: &Value) -> TesseraResult<Self> {
        match value {
            Value::Date(d) => Ok(*d),
            Value::String(s) => s
                .parse()
                .map_err(|e| TesseraError::DatabaseError(format!("Invalid date '{s}': {e}"))),
            _ => Err(mismatch("Date", value)),
        }
    }
}

impl FromValue for chrono::NaiveDateTime {
    fn from_value(value: &Value) -> TesseraResult<Self> {
        match value {
            Value::DateTime(dt) => Ok(*dt),
            Value::String(s) => {
                chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").map_err(|e| {
                    TesseraError::DatabaseError(format!("Invalid datetime '{s}': {e}"))
                })
            }
            _ => Err(mismatch("DateTime", value)),
        }
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: &Value) -> TesseraResult<Self> {
        match value {
            Value::Json(j) => Ok(j.clone()),
            Value::String(s) => serde_json::from_str(s)
                .map_err(|e| TesseraError::DatabaseError(format!("Invalid JSON column: {e}"))),
            _ => Err(mismatch("Json", value)),
        }
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> TesseraResult<Self> {
        Ok(value.clone())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> TesseraResult<Self> {
        match value {
            Value::Null => Ok(None),
            _ => T::from_value(value).map(Some),
        }
    }
}
