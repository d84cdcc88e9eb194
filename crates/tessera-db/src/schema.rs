//! Table, column and foreign-key definitions.
//!
//! A [`TableDef`] is the declared shape of one relation. Foreign keys live on
//! the referencing column ([`ColumnDef::references`]), so the edge set of the
//! dependency graph is the union of every column's [`ForeignKey`].
//!
//! The [`Schema`] registry holds the definitions known to a connection and
//! answers reverse-graph questions for cascades.
//!
//! # Examples
//!
//! ```
//! use tessera_db::schema::{ColumnDef, ColumnType, TableDef};
//!
//! let user = TableDef::with_auto_id("user")
//!     .column(ColumnDef::new("username", ColumnType::Char).max_length(50).unique());
//! let tweet = TableDef::with_auto_id("tweet")
//!     .column(ColumnDef::foreign_key("user_id", "user"))
//!     .column(ColumnDef::new("content", ColumnType::Text));
//!
//! assert!(user.validate().is_ok());
//! assert_eq!(tweet.referenced_tables(), vec!["user"]);
//! ```

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tessera_core::{TesseraError, TesseraResult};

use crate::value::Value;

/// The storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    /// An auto-incrementing 32-bit integer key.
    AutoField,
    /// An auto-incrementing 64-bit integer key.
    BigAutoField,
    Integer,
    BigInteger,
    Float,
    Boolean,
    /// Variable-length text bounded by `max_length`.
    Char,
    Text,
    Date,
    DateTime,
    Uuid,
    Blob,
    Json,
}

impl ColumnType {
    /// Returns `true` for types whose values the store generates.
    pub const fn is_auto(self) -> bool {
        matches!(self, Self::AutoField | Self::BigAutoField)
    }
}

/// What the store does to referencing rows when the referenced row is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnDelete {
    /// No clause is emitted; the store refuses the delete.
    #[default]
    NoAction,
    Cascade,
    Restrict,
    SetNull,
    SetDefault,
}

impl OnDelete {
    /// The `ON DELETE` action keyword, or `None` for the store default.
    pub const fn as_sql(self) -> Option<&'static str> {
        match self {
            Self::NoAction => None,
            Self::Cascade => Some("CASCADE"),
            Self::Restrict => Some("RESTRICT"),
            Self::SetNull => Some("SET NULL"),
            Self::SetDefault => Some("SET DEFAULT"),
        }
    }
}

fn default_fk_column() -> String {
    "id".to_string()
}

/// A foreign-key edge from the owning column to `table.column`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// The referenced table.
    pub table: String,
    /// The referenced column. Any unique column may be targeted.
    #[serde(default = "default_fk_column")]
    pub column: String,
    #[serde(default)]
    pub on_delete: OnDelete,
}

impl ForeignKey {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            on_delete: OnDelete::NoAction,
        }
    }
}

/// A column default applied when an insert leaves the column unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnDefault {
    /// A fixed value, also emitted as a `DEFAULT` clause.
    Value(Value),
    /// The current UTC time, computed on insert.
    Now,
}

/// One column of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ColumnType,
    #[serde(default)]
    pub primary_key: bool,
    /// Whether the column accepts NULL.
    #[serde(default)]
    pub null: bool,
    #[serde(default)]
    pub unique: bool,
    /// Whether a single-column index is created.
    #[serde(default)]
    pub index: bool,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub default: Option<ColumnDefault>,
    #[serde(default)]
    pub references: Option<ForeignKey>,
}

impl ColumnDef {
    /// A non-null column with no constraints.
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            primary_key: false,
            null: false,
            unique: false,
            index: false,
            max_length: None,
            default: None,
            references: None,
        }
    }

    /// An integer column referencing `table.id`.
    pub fn foreign_key(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Integer).references(table, "id")
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn null(mut self) -> Self {
        self.null = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn index(mut self) -> Self {
        self.index = true;
        self
    }

    pub fn max_length(mut self, len: u32) -> Self {
        self.max_length = Some(len);
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(ColumnDefault::Value(value.into()));
        self
    }

    pub fn default_now(mut self) -> Self {
        self.default = Some(ColumnDefault::Now);
        self
    }

    /// Adds a foreign key to `table.column`.
    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.references = Some(ForeignKey::new(table, column));
        self
    }

    /// Sets the `ON DELETE` action of this column's foreign key.
    ///
    /// Has no effect on a column without one.
    pub fn on_delete(mut self, action: OnDelete) -> Self {
        if let Some(fk) = self.references.as_mut() {
            fk.on_delete = action;
        }
        self
    }
}

/// A named index over one or more columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexDef {
    pub fn new(name: impl Into<String>, columns: &[&str], unique: bool) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(ToString::to_string).collect(),
            unique,
        }
    }
}

/// The declared shape of one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
}

impl TableDef {
    /// An empty table; add columns with [`column`](Self::column).
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
        }
    }

    /// A table whose primary key is an auto-incrementing `id`.
    pub fn with_auto_id(name: impl Into<String>) -> Self {
        Self::new(name).column(ColumnDef::new("id", ColumnType::AutoField).primary_key())
    }

    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn get_column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// The primary key column.
    pub fn primary_key(&self) -> TesseraResult<&ColumnDef> {
        self.columns.iter().find(|c| c.primary_key).ok_or_else(|| {
            TesseraError::SchemaError(format!("Table '{}' has no primary key", self.name))
        })
    }

    /// Iterates over `(column, foreign key)` pairs in column order.
    pub fn foreign_keys(&self) -> impl Iterator<Item = (&ColumnDef, &ForeignKey)> {
        self.columns
            .iter()
            .filter_map(|c| c.references.as_ref().map(|fk| (c, fk)))
    }

    /// The distinct tables this one references, excluding itself.
    pub fn referenced_tables(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for (_, fk) in self.foreign_keys() {
            if fk.table != self.name && !seen.contains(&fk.table.as_str()) {
                seen.push(fk.table.as_str());
            }
        }
        seen
    }

    /// Declared indexes followed by the single-column indexes implied by
    /// `unique` and `index` column flags.
    pub fn all_indexes(&self) -> Vec<IndexDef> {
        let mut all = self.indexes.clone();
        for col in &self.columns {
            if col.primary_key || !(col.unique || col.index) {
                continue;
            }
            all.push(IndexDef {
                name: format!("{}_{}", self.name, col.name),
                columns: vec![col.name.clone()],
                unique: col.unique,
            });
        }
        all
    }

    /// Checks that the definition is internally consistent.
    pub fn validate(&self) -> TesseraResult<()> {
        if self.name.trim().is_empty() {
            return Err(TesseraError::SchemaError(
                "Table name must not be empty".to_string(),
            ));
        }

        let pks = self.columns.iter().filter(|c| c.primary_key).count();
        if pks != 1 {
            return Err(TesseraError::SchemaError(format!(
                "Table '{}' must have exactly one primary key column, found {pks}",
                self.name
            )));
        }

        let mut names = HashSet::new();
        for col in &self.columns {
            if !names.insert(col.name.as_str()) {
                return Err(TesseraError::SchemaError(format!(
                    "Duplicate column '{}' in table '{}'",
                    col.name, self.name
                )));
            }
            if col.ty.is_auto() && !col.primary_key {
                return Err(TesseraError::SchemaError(format!(
                    "Auto column '{}.{}' must be the primary key",
                    self.name, col.name
                )));
            }
        }

        for index in &self.indexes {
            if index.columns.is_empty() {
                return Err(TesseraError::SchemaError(format!(
                    "Index '{}' on '{}' has no columns",
                    index.name, self.name
                )));
            }
            if let Some(missing) = index.columns.iter().find(|c| !names.contains(c.as_str())) {
                return Err(TesseraError::SchemaError(format!(
                    "Index '{}' refers to unknown column '{}.{missing}'",
                    index.name, self.name
                )));
            }
        }

        for (col, fk) in self.foreign_keys() {
            if fk.table == self.name && !names.contains(fk.column.as_str()) {
                return Err(TesseraError::SchemaError(format!(
                    "Foreign key '{}.{}' refers to unknown column '{}.{}'",
                    self.name, col.name, fk.table, fk.column
                )));
            }
            if fk.on_delete == OnDelete::SetNull && !col.null {
                return Err(TesseraError::SchemaError(format!(
                    "Foreign key '{}.{}' uses SET NULL but is not nullable",
                    self.name, col.name
                )));
            }
        }

        Ok(())
    }
}

/// An incoming foreign-key edge: `table.column` references the target's
/// `referenced_column`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReverseEdge {
    /// The referencing table.
    pub table: String,
    /// The referencing column.
    pub column: String,
    /// The column of the referenced table that `column` holds values of.
    pub referenced_column: String,
    /// Whether the referencing column accepts NULL.
    pub nullable: bool,
    pub on_delete: OnDelete,
}

/// The registry of table definitions known to a connection.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    tables: Vec<TableDef>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and registers a table, replacing one with the same name.
    pub fn register(&mut self, table: TableDef) -> TesseraResult<()> {
        table.validate()?;
        if let Some(existing) = self.tables.iter_mut().find(|t| t.name == table.name) {
            *existing = table;
        } else {
            self.tables.push(table);
        }
        Ok(())
    }

    /// Removes a table, returning its definition if it was registered.
    pub fn unregister(&mut self, name: &str) -> Option<TableDef> {
        let pos = self.tables.iter().position(|t| t.name == name)?;
        Some(self.tables.remove(pos))
    }

    pub fn get(&self, name: &str) -> Option<&TableDef> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Like [`get`](Self::get), but an unknown table is a `SchemaError`.
    pub fn require(&self, name: &str) -> TesseraResult<&TableDef> {
        self.get(name)
            .ok_or_else(|| TesseraError::SchemaError(format!("Unknown table '{name}'")))
    }

    /// Registered tables in registration order.
    pub fn tables(&self) -> &[TableDef] {
        &self.tables
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Foreign keys pointing at `table`, in registration order. Includes
    /// self-references.
    pub fn dependents_of(&self, table: &str) -> Vec<ReverseEdge> {
        self.tables
            .iter()
            .flat_map(|t| {
                t.foreign_keys()
                    .filter(|(_, fk)| fk.table == table)
                    .map(|(col, fk)| ReverseEdge {
                        table: t.name.clone(),
                        column: col.name.clone(),
                        referenced_column: fk.column.clone(),
                        nullable: col.null,
                        on_delete: fk.on_delete,
                    })
            })
            .collect()
    }

    /// Every table that transitively references `table`, in breadth-first
    /// order. `table` itself is included only if it is reachable through a
    /// cycle or a self-reference.
    pub fn dependency_closure(&self, table: &str) -> Vec<String> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::from([table.to_string()]);
        while let Some(current) = queue.pop_front() {
            for edge in self.dependents_of(&current) {
                if seen.insert(edge.table.clone()) {
                    order.push(edge.table.clone());
                    queue.push_back(edge.table);
                }
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> TableDef {
        TableDef::with_auto_id("user")
            .column(ColumnDef::new("username", ColumnType::Char).max_length(50).unique())
    }

    fn tweet() -> TableDef {
        TableDef::with_auto_id("tweet")
            .column(ColumnDef::foreign_key("user_id", "user").index())
            .column(ColumnDef::new("content", ColumnType::Text))
            .column(ColumnDef::new("created", ColumnType::DateTime).default_now())
    }

    fn category() -> TableDef {
        TableDef::with_auto_id("category")
            .column(ColumnDef::foreign_key("parent_id", "category").null())
    }

    #[test]
    fn test_builder_and_lookup() {
        let t = tweet();
        assert_eq!(t.primary_key().unwrap().name, "id");
        assert_eq!(t.get_column("content").unwrap().ty, ColumnType::Text);
        assert_eq!(
            t.get_column("created").unwrap().default,
            Some(ColumnDefault::Now)
        );
        let (col, fk) = t.foreign_keys().next().unwrap();
        assert_eq!(col.name, "user_id");
        assert_eq!(fk.table, "user");
        assert_eq!(fk.column, "id");
        assert_eq!(fk.on_delete, OnDelete::NoAction);
    }

    #[test]
    fn test_referenced_tables_skip_self() {
        assert!(category().referenced_tables().is_empty());
        assert_eq!(tweet().referenced_tables(), vec!["user"]);
    }

    #[test]
    fn test_all_indexes_from_flags() {
        let idx = user().all_indexes();
        assert_eq!(idx.len(), 1);
        assert_eq!(idx[0].name, "user_username");
        assert!(idx[0].unique);

        let idx = tweet().all_indexes();
        assert_eq!(idx[0].name, "tweet_user_id");
        assert!(!idx[0].unique);
    }

    #[test]
    fn test_validate_primary_key_count() {
        let none = TableDef::new("t").column(ColumnDef::new("a", ColumnType::Integer));
        assert!(matches!(none.validate(), Err(TesseraError::SchemaError(_))));

        let two = TableDef::with_auto_id("t")
            .column(ColumnDef::new("b", ColumnType::Integer).primary_key());
        assert!(two.validate().is_err());
    }

    #[test]
    fn test_validate_duplicates_and_indexes() {
        let dup = TableDef::with_auto_id("t").column(ColumnDef::new("id", ColumnType::Text));
        assert!(dup.validate().is_err());

        let bad_index = TableDef::with_auto_id("t").index(IndexDef::new("t_x", &["x"], false));
        let err = bad_index.validate().unwrap_err();
        assert!(err.to_string().contains("unknown column 't.x'"));

        assert!(TableDef::with_auto_id(" ").validate().is_err());
    }

    #[test]
    fn test_validate_set_null_requires_nullable() {
        let t = TableDef::with_auto_id("t")
            .column(ColumnDef::foreign_key("u", "user").on_delete(OnDelete::SetNull));
        assert!(t.validate().is_err());
        let ok = TableDef::with_auto_id("t")
            .column(ColumnDef::foreign_key("u", "user").null().on_delete(OnDelete::SetNull));
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut schema = Schema::new();
        schema.register(user()).unwrap();
        schema.register(user().column(ColumnDef::new("bio", ColumnType::Text))).unwrap();
        assert_eq!(schema.len(), 1);
        assert!(schema.require("user").unwrap().get_column("bio").is_some());
        assert!(schema.require("nope").is_err());
        assert!(schema.unregister("user").is_some());
        assert!(schema.is_empty());
    }

    #[test]
    fn test_dependents_and_closure() {
        let like = TableDef::with_auto_id("like")
            .column(ColumnDef::foreign_key("tweet_id", "tweet"))
            .column(ColumnDef::foreign_key("user_id", "user").null());
        let mut schema = Schema::new();
        for t in [user(), tweet(), like, category()] {
            schema.register(t).unwrap();
        }

        let deps = schema.dependents_of("user");
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].table, "tweet");
        assert!(!deps[0].nullable);
        assert_eq!(deps[1].table, "like");
        assert!(deps[1].nullable);

        assert_eq!(schema.dependency_closure("user"), vec!["tweet", "like"]);
        assert_eq!(schema.dependency_closure("category"), vec!["category"]);
        assert!(schema.dependency_closure("like").is_empty());
    }

    #[test]
    fn test_deserialize_from_toml() {
        #[derive(Deserialize)]
        struct File {
            tables: Vec<TableDef>,
        }
        let file: File = toml::from_str(
            r#"
            [[tables]]
            name = "note"

            [[tables.columns]]
            name = "id"
            type = "auto_field"
            primary_key = true

            [[tables.columns]]
            name = "author_id"
            type = "integer"
            null = true
            references = { table = "user", on_delete = "cascade" }

            [[tables.columns]]
            name = "created"
            type = "date_time"
            default = "now"
            "#,
        )
        .unwrap();
        let note = &file.tables[0];
        note.validate().unwrap();
        let fk = note.get_column("author_id").unwrap().references.as_ref().unwrap();
        assert_eq!(fk.column, "id");
        assert_eq!(fk.on_delete, OnDelete::Cascade);
        assert_eq!(
            note.get_column("created").unwrap().default,
            Some(ColumnDefault::Now)
        );
    }
}
