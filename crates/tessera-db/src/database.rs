//! The [`Database`] connection.
//!
//! A `Database` pairs one executor (a single store connection) with its
//! transaction-frame stack and the registry of tables it knows about. All
//! higher-level operations run through it: raw SQL, schema creation, row
//! CRUD and cascade deletes.
//!
//! ```ignore
//! let db = tessera_db_backends::connect(&DatabaseSettings::sqlite_memory())?;
//! db.create_tables(&[user, tweet], true).await?;
//! let ada = db.insert("user", &[("username", "ada".into())]).await?;
//! db.atomic(|txn| async move {
//!     txn.execute_sql("UPDATE ...", &[]).await?;
//!     Ok(())
//! })
//! .await?;
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tessera_core::{TesseraError, TesseraResult};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, Instrument, Span};

use crate::cascade::{cascade_delete, CascadeReport, DeleteOptions};
use crate::compiler::{Filter, SqlCompiler};
use crate::ddl::schema_editor_for;
use crate::executor::{Cursor, DatabaseBackendType, DbExecutor};
use crate::model::Instance;
use crate::resolver::{order_for_creation, order_for_drop};
use crate::schema::{ColumnDefault, Schema, TableDef};
use crate::transactions::{atomic, FrameHandle, Transaction, TransactionManager};
use crate::value::Value;

/// One open connection with its frame stack and table registry.
pub struct Database {
    manager: Arc<TransactionManager>,
    schema: RwLock<Schema>,
    /// The root frame opened by `execute_sql(.., commit = false)`.
    implicit: Mutex<Option<FrameHandle>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("connection_id", &self.connection_id())
            .field("backend", &self.backend_type())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Wraps an open executor. The connection gets a fresh id.
    pub fn new(db: Arc<dyn DbExecutor>) -> Self {
        Self {
            manager: Arc::new(TransactionManager::new(db)),
            schema: RwLock::new(Schema::new()),
            implicit: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn connection_id(&self) -> u64 {
        self.manager.connection_id()
    }

    pub fn backend_type(&self) -> DatabaseBackendType {
        self.manager.executor().backend_type()
    }

    /// The underlying executor. Statements issued on it take part in
    /// whatever frame is open.
    pub fn executor(&self) -> &Arc<dyn DbExecutor> {
        self.manager.executor()
    }

    pub fn transaction_manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    /// The `connection` span this connection's statements are logged under.
    pub fn span(&self) -> &Span {
        self.manager.span()
    }

    /// Logs `sql` and awaits `op` inside the connection span.
    async fn traced<T>(
        &self,
        sql: &str,
        op: impl Future<Output = TesseraResult<T>>,
    ) -> TesseraResult<T> {
        async {
            debug!(target: "tessera::sql", "{sql}");
            op.await
        }
        .instrument(self.span().clone())
        .await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> TesseraResult<()> {
        if self.is_closed() {
            return Err(TesseraError::OperationalError(format!(
                "Connection {} is closed",
                self.connection_id()
            )));
        }
        Ok(())
    }

    /// Closes the connection. Returns `false` if it was already closed.
    ///
    /// Fails with `OperationalError` while any frame is open; the
    /// connection then stays usable.
    pub async fn close(&self) -> TesseraResult<bool> {
        if self.is_closed() {
            return Ok(false);
        }
        let depth = self.manager.depth().await;
        if depth > 0 {
            return Err(TesseraError::OperationalError(format!(
                "Cannot close connection {} with {depth} open transaction frame(s)",
                self.connection_id()
            )));
        }
        self.executor().close().instrument(self.span().clone()).await?;
        self.closed.store(true, Ordering::Release);
        info!(connection = self.connection_id(), "Closed connection");
        Ok(true)
    }

    // ── Raw SQL ──────────────────────────────────────────────────────

    /// Runs one statement and returns a cursor over its result.
    ///
    /// With `commit = false` and no frame open, an implicit transaction is
    /// started first and stays open until [`commit`](Self::commit) or
    /// [`rollback`](Self::rollback). Inside an open frame the flag is
    /// ignored.
    pub async fn execute_sql(
        &self,
        sql: &str,
        params: &[Value],
        commit: bool,
    ) -> TesseraResult<Cursor> {
        self.ensure_open()?;
        if !commit && !self.manager.in_transaction().await {
            let handle = self.manager.begin().await?;
            *self.implicit.lock().await = Some(handle);
        }
        self.traced(sql, self.executor().cursor(sql, params)).await
    }

    /// Commits the implicit transaction opened by `execute_sql`, if any.
    pub async fn commit(&self) -> TesseraResult<()> {
        self.close_implicit(true).await
    }

    /// Rolls back the implicit transaction opened by `execute_sql`, if any.
    pub async fn rollback(&self) -> TesseraResult<()> {
        self.close_implicit(false).await
    }

    async fn close_implicit(&self, commit: bool) -> TesseraResult<()> {
        let mut implicit = self.implicit.lock().await;
        let Some(handle) = implicit.take() else {
            return Ok(());
        };
        if !self.manager.is_open(&handle).await {
            return Ok(());
        }
        let result = if commit {
            self.manager.commit(&handle).await
        } else {
            self.manager.rollback(&handle).await
        };
        if let Err(e @ TesseraError::ProtocolError(_)) = result {
            *implicit = Some(handle);
            return Err(e);
        }
        result
    }

    // ── Transactions ─────────────────────────────────────────────────

    pub async fn in_transaction(&self) -> bool {
        self.manager.in_transaction().await
    }

    /// Number of open frames on this connection.
    pub async fn depth(&self) -> usize {
        self.manager.depth().await
    }

    /// Runs `f` in a transaction, or in a savepoint if one is already open.
    pub async fn atomic<F, Fut, T>(&self, f: F) -> TesseraResult<T>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = TesseraResult<T>>,
    {
        self.ensure_open()?;
        atomic(&self.manager, f).await
    }

    /// Opens a frame that the caller closes with
    /// [`Transaction::commit`] or [`Transaction::rollback`].
    pub async fn begin(&self) -> TesseraResult<Transaction> {
        self.ensure_open()?;
        let handle = self.manager.begin().await?;
        Ok(Transaction::new(Arc::clone(&self.manager), handle))
    }

    pub async fn commit_frame(&self, handle: &FrameHandle) -> TesseraResult<()> {
        self.manager.commit(handle).await
    }

    pub async fn rollback_frame(&self, handle: &FrameHandle) -> TesseraResult<()> {
        self.manager.rollback(handle).await
    }

    // ── Schema ───────────────────────────────────────────────────────

    /// Registers definitions without issuing DDL, for tables that already
    /// exist in the store.
    pub async fn register_tables(&self, tables: &[TableDef]) -> TesseraResult<()> {
        let mut schema = self.schema.write().await;
        for table in tables {
            schema.register(table.clone())?;
        }
        Ok(())
    }

    pub async fn table(&self, name: &str) -> Option<TableDef> {
        self.schema.read().await.get(name).cloned()
    }

    pub async fn tables(&self) -> Vec<TableDef> {
        self.schema.read().await.tables().to_vec()
    }

    /// A copy of the table registry.
    pub async fn schema(&self) -> Schema {
        self.schema.read().await.clone()
    }

    async fn require_table(&self, name: &str) -> TesseraResult<TableDef> {
        self.table(name)
            .await
            .ok_or_else(|| TesseraError::SchemaError(format!("Unknown table '{name}'")))
    }

    /// Creates `tables` in dependency order and registers them.
    ///
    /// All `CREATE TABLE` statements run first, then all indexes, inside
    /// one atomic scope. `safe` adds `IF NOT EXISTS`. Returns the table
    /// names in creation order.
    pub async fn create_tables(&self, tables: &[TableDef], safe: bool) -> TesseraResult<Vec<String>> {
        self.ensure_open()?;
        for table in tables {
            table.validate()?;
        }
        let ordered = order_for_creation(tables)?;
        let statements = {
            let editor = schema_editor_for(self.backend_type());
            let mut statements: Vec<String> =
                ordered.iter().map(|t| editor.create_table(t, safe)).collect();
            for table in &ordered {
                statements.extend(editor.create_indexes(table, safe));
            }
            statements
        };

        let stmts = &statements;
        atomic(&self.manager, |txn| async move {
            for sql in stmts {
                debug!(target: "tessera::sql", "{sql}");
                txn.execute_sql(sql, &[]).await?;
            }
            Ok(())
        })
        .await?;

        let names: Vec<String> = ordered.iter().map(|t| t.name.clone()).collect();
        let mut schema = self.schema.write().await;
        for table in ordered {
            schema.register(table.clone())?;
        }
        info!(connection = self.connection_id(), tables = ?names, "Created tables");
        Ok(names)
    }

    /// Drops `tables`, dependents first, and unregisters them.
    pub async fn drop_tables(&self, tables: &[TableDef], safe: bool) -> TesseraResult<Vec<String>> {
        self.ensure_open()?;
        let ordered = order_for_drop(tables)?;
        let statements: Vec<String> = {
            let editor = schema_editor_for(self.backend_type());
            ordered.iter().map(|t| editor.drop_table(&t.name, safe)).collect()
        };

        let stmts = &statements;
        atomic(&self.manager, |txn| async move {
            for sql in stmts {
                debug!(target: "tessera::sql", "{sql}");
                txn.execute_sql(sql, &[]).await?;
            }
            Ok(())
        })
        .await?;

        let names: Vec<String> = ordered.iter().map(|t| t.name.clone()).collect();
        let mut schema = self.schema.write().await;
        for name in &names {
            schema.unregister(name);
        }
        info!(connection = self.connection_id(), tables = ?names, "Dropped tables");
        Ok(names)
    }

    // ── CRUD ─────────────────────────────────────────────────────────

    fn compiler(&self) -> SqlCompiler {
        SqlCompiler::new(self.backend_type())
    }

    /// Inserts one row into a registered table.
    ///
    /// Unset columns take their declared default (`Now` is evaluated here);
    /// unset nullable columns are written as NULL. The primary key is
    /// either given or generated by the store for auto columns.
    pub async fn insert(&self, table: &str, values: &[(&str, Value)]) -> TesseraResult<Instance> {
        self.ensure_open()?;
        let def = self.require_table(table).await?;
        if let Some((unknown, _)) = values.iter().find(|(name, _)| def.get_column(name).is_none()) {
            return Err(TesseraError::SchemaError(format!(
                "Table '{table}' has no column '{unknown}'"
            )));
        }

        let pk_column = def.primary_key()?;
        // A NULL primary key is the same as leaving it unset.
        let mut fields: Vec<(String, Value)> = values
            .iter()
            .filter(|(name, value)| !(*name == pk_column.name && value.is_null()))
            .map(|(name, value)| ((*name).to_string(), value.clone()))
            .collect();
        for column in &def.columns {
            if column.primary_key || fields.iter().any(|(name, _)| *name == column.name) {
                continue;
            }
            let value = match &column.default {
                Some(ColumnDefault::Value(value)) => value.clone(),
                Some(ColumnDefault::Now) => Value::now(),
                None if column.null => Value::Null,
                None => continue,
            };
            fields.push((column.name.clone(), value));
        }

        let explicit_pk = fields
            .iter()
            .find(|(name, _)| *name == pk_column.name)
            .map(|(_, value)| value.clone());
        let (sql, params) = self.compiler().compile_insert(table, &fields);
        let pk = match explicit_pk {
            Some(pk) => {
                self.traced(&sql, self.executor().execute_sql(&sql, &params)).await?;
                pk
            }
            None if pk_column.ty.is_auto() => {
                self.traced(&sql, self.executor().insert_returning_id(&sql, &params))
                    .await?
            }
            None => {
                return Err(TesseraError::SchemaError(format!(
                    "Primary key '{table}.{}' is not generated and must be given",
                    pk_column.name
                )))
            }
        };

        let mut instance = Instance::new(&def)?;
        for (name, value) in fields {
            instance.set(&name, value)?;
        }
        instance.mark_persisted(pk);
        Ok(instance)
    }

    /// Writes `instance` back: an UPDATE by primary key once persisted,
    /// otherwise an insert that gives it its identity. Returns the number
    /// of rows written.
    pub async fn save(&self, instance: &mut Instance) -> TesseraResult<u64> {
        self.ensure_open()?;
        let Some(pk) = instance.pk().cloned() else {
            let values: Vec<(&str, Value)> = instance
                .values()
                .iter()
                .map(|(name, value)| (name.as_str(), value.clone()))
                .collect();
            *instance = self.insert(instance.table(), &values).await?;
            return Ok(1);
        };

        let fields = instance.non_pk_values();
        if fields.is_empty() {
            return Ok(0);
        }
        let (sql, params) = self.compiler().compile_update(
            instance.table(),
            &fields,
            &[Filter::eq(instance.pk_column(), pk)],
        );
        self.traced(&sql, self.executor().execute_sql(&sql, &params)).await
    }

    /// Rows of `table` matching every filter.
    pub async fn select(&self, table: &str, filters: &[Filter]) -> TesseraResult<Vec<Instance>> {
        self.ensure_open()?;
        let def = self.require_table(table).await?;
        let (sql, params) = self.compiler().compile_select(table, filters, None);
        self.traced(&sql, self.executor().query(&sql, &params))
            .await?
            .into_iter()
            .map(|row| Instance::from_row(&def, row))
            .collect()
    }

    /// Exactly one row of `table` matching the filters.
    pub async fn get(&self, table: &str, filters: &[Filter]) -> TesseraResult<Instance> {
        self.get_or_none(table, filters).await?.ok_or_else(|| {
            TesseraError::NotFound(format!("{table} matching {filters:?}"))
        })
    }

    /// Like [`get`](Self::get), but zero rows is `Ok(None)`.
    pub async fn get_or_none(&self, table: &str, filters: &[Filter]) -> TesseraResult<Option<Instance>> {
        self.ensure_open()?;
        let def = self.require_table(table).await?;
        let (sql, params) = self.compiler().compile_select(table, filters, Some(2));
        let mut rows = self.traced(&sql, self.executor().query(&sql, &params)).await?;
        if rows.len() > 1 {
            return Err(TesseraError::MultipleObjectsReturned(format!(
                "{table} matching {filters:?}"
            )));
        }
        rows.pop().map(|row| Instance::from_row(&def, row)).transpose()
    }

    pub async fn count(&self, table: &str, filters: &[Filter]) -> TesseraResult<u64> {
        self.ensure_open()?;
        let (sql, params) = self.compiler().compile_count(table, filters);
        let row = self.traced(&sql, self.executor().query_one(&sql, &params)).await?;
        let n: i64 = row.get("count")?;
        u64::try_from(n).map_err(|_| TesseraError::DatabaseError(format!("Negative count {n}")))
    }

    /// Deletes `instance` and, per `options`, its dependents, inside one
    /// atomic scope.
    pub async fn delete_instance(
        &self,
        instance: &Instance,
        options: DeleteOptions,
    ) -> TesseraResult<CascadeReport> {
        self.ensure_open()?;
        if !instance.is_persisted() {
            return Err(TesseraError::SchemaError(format!(
                "Cannot delete an unsaved '{}' instance",
                instance.table()
            )));
        }
        let schema = self.schema().await;
        atomic(&self.manager, |txn| async move {
            cascade_delete(&txn, &schema, instance, options).await
        })
        .await
    }
}
