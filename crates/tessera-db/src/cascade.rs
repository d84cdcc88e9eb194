//! Recursive deletes over the reverse foreign-key graph.
//!
//! Deleting a row that other rows reference either fails in the store (the
//! non-recursive path) or first removes everything that depends on it. The
//! recursive walk runs in two phases:
//!
//! 1. **Plan** ([`plan_cascade`]): read-only. Starting from the target row,
//!    follow every incoming foreign key and collect the primary keys of the
//!    referencing rows, breadth first, each row once. Nullable foreign keys
//!    become `SET NULL` steps and are not descended through unless
//!    [`DeleteOptions::delete_nullable`] is set. The collected tables are
//!    then ordered with the [`resolver`](crate::resolver) over the edges that
//!    delete, dependents first.
//! 2. **Execute** ([`DeletePlan::execute`]): all `SET NULL` updates, then one
//!    chunked `DELETE ... WHERE pk IN (...)` pass per table, with rows
//!    discovered deeper deleted first so self-referencing chains unwind from
//!    the leaves.
//!
//! Callers that want all-or-nothing behaviour run both phases inside one
//! transaction frame; [`Database::delete_instance`](crate::Database::delete_instance)
//! does.

use std::collections::{HashMap, HashSet, VecDeque};

use tessera_core::{TesseraError, TesseraResult};
use tracing::{debug, info};

use crate::compiler::{Filter, SqlCompiler};
use crate::executor::DbExecutor;
use crate::model::Instance;
use crate::resolver::DependencyGraph;
use crate::schema::Schema;
use crate::value::Value;

/// Upper bound on the number of values bound into one `IN (...)` list.
pub const IN_CHUNK_SIZE: usize = 500;

/// How [`cascade_delete`] treats dependent rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeleteOptions {
    /// Delete dependent rows first instead of relying on the store.
    pub recursive: bool,
    /// Delete rows referencing through nullable foreign keys instead of
    /// setting those keys to NULL.
    pub delete_nullable: bool,
}

impl DeleteOptions {
    /// Delete only the target row.
    pub const fn single() -> Self {
        Self {
            recursive: false,
            delete_nullable: false,
        }
    }

    /// Delete the target row and everything depending on it.
    pub const fn recursive() -> Self {
        Self {
            recursive: true,
            delete_nullable: false,
        }
    }

    pub const fn with_delete_nullable(mut self, delete_nullable: bool) -> Self {
        self.delete_nullable = delete_nullable;
        self
    }
}

/// Rows touched in one table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCounts {
    pub deleted: u64,
    pub nullified: u64,
}

/// What a cascade removed, per table, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeReport {
    tables: Vec<(String, TableCounts)>,
}

impl CascadeReport {
    fn entry(&mut self, table: &str) -> &mut TableCounts {
        let pos = match self.tables.iter().position(|(t, _)| t == table) {
            Some(pos) => pos,
            None => {
                self.tables.push((table.to_string(), TableCounts::default()));
                self.tables.len() - 1
            }
        };
        &mut self.tables[pos].1
    }

    /// Per-table counts in the order the tables were first touched.
    pub fn tables(&self) -> &[(String, TableCounts)] {
        &self.tables
    }

    pub fn deleted(&self, table: &str) -> u64 {
        self.counts(table).deleted
    }

    pub fn nullified(&self, table: &str) -> u64 {
        self.counts(table).nullified
    }

    fn counts(&self, table: &str) -> TableCounts {
        self.tables
            .iter()
            .find(|(t, _)| t == table)
            .map(|(_, c)| *c)
            .unwrap_or_default()
    }

    /// Rows removed across all tables, target included.
    pub fn total_deleted(&self) -> u64 {
        self.tables.iter().map(|(_, c)| c.deleted).sum()
    }

    pub fn total_nullified(&self) -> u64 {
        self.tables.iter().map(|(_, c)| c.nullified).sum()
    }
}

/// A `SET NULL` step: `table.column` cleared on the rows `pks`.
#[derive(Debug, Clone, PartialEq)]
pub struct NullifyStep {
    pub table: String,
    pub column: String,
    pub pk_column: String,
    pub pks: Vec<Value>,
}

/// A delete step: the rows `pks` of `table`, already in delete order.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStep {
    pub table: String,
    pub pk_column: String,
    pub pks: Vec<Value>,
}

/// The statements a cascade will run, computed without modifying anything.
#[derive(Debug, Clone, PartialEq)]
pub struct DeletePlan {
    nullify: Vec<NullifyStep>,
    deletes: Vec<DeleteStep>,
}

impl DeletePlan {
    pub fn nullify_steps(&self) -> &[NullifyStep] {
        &self.nullify
    }

    /// Delete steps in execution order; the target table comes last.
    pub fn delete_steps(&self) -> &[DeleteStep] {
        &self.deletes
    }

    /// Runs the plan on `db`.
    pub async fn execute(&self, db: &dyn DbExecutor) -> TesseraResult<CascadeReport> {
        let compiler = SqlCompiler::new(db.backend_type());
        let mut report = CascadeReport::default();

        for step in &self.nullify {
            let fields = [(step.column.clone(), Value::Null)];
            for chunk in step.pks.chunks(IN_CHUNK_SIZE) {
                let (sql, params) = compiler.compile_update(
                    &step.table,
                    &fields,
                    &[Filter::is_in(step.pk_column.clone(), chunk.to_vec())],
                );
                debug!(target: "tessera::sql", "{sql}");
                report.entry(&step.table).nullified += db.execute_sql(&sql, &params).await?;
            }
        }

        for step in &self.deletes {
            for chunk in step.pks.chunks(IN_CHUNK_SIZE) {
                let (sql, params) = compiler.compile_delete(
                    &step.table,
                    &[Filter::is_in(step.pk_column.clone(), chunk.to_vec())],
                );
                debug!(target: "tessera::sql", "{sql}");
                report.entry(&step.table).deleted += db.execute_sql(&sql, &params).await?;
            }
        }

        Ok(report)
    }
}

/// Identity of a value inside pk sets. `Value` holds floats, so it is not `Hash`.
fn key(value: &Value) -> String {
    format!("{value:?}")
}

#[derive(Default)]
struct Collected {
    pk_column: String,
    /// `(pk, depth)` in discovery order.
    rows: Vec<(Value, usize)>,
    seen: HashSet<String>,
}

impl Collected {
    /// Adds the unseen values, returning them.
    fn add(&mut self, pks: Vec<Value>, depth: usize) -> Vec<Value> {
        let mut fresh = Vec::new();
        for pk in pks {
            if self.seen.insert(key(&pk)) {
                self.rows.push((pk.clone(), depth));
                fresh.push(pk);
            }
        }
        fresh
    }

    /// Deepest rows first, discovery order among equals.
    fn into_delete_order(mut self) -> Vec<Value> {
        self.rows.sort_by(|a, b| b.1.cmp(&a.1));
        self.rows.into_iter().map(|(pk, _)| pk).collect()
    }
}

/// Selects `select_column` from `table` where `filter_column IN values`,
/// chunked. NULLs are skipped.
async fn select_in(
    db: &dyn DbExecutor,
    compiler: SqlCompiler,
    table: &str,
    select_column: &str,
    filter_column: &str,
    values: &[Value],
) -> TesseraResult<Vec<Value>> {
    let mut out = Vec::new();
    for chunk in values.chunks(IN_CHUNK_SIZE) {
        let (sql, params) = compiler.compile_select_columns(
            table,
            &[select_column],
            &[Filter::is_in(filter_column, chunk.to_vec())],
            None,
        );
        debug!(target: "tessera::sql", "{sql}");
        for row in db.query(&sql, &params).await? {
            let value = row.get_by_index::<Value>(0)?;
            if !value.is_null() {
                out.push(value);
            }
        }
    }
    Ok(out)
}

/// Plans the deletion of `instance` and, when `options.recursive`, of every
/// row depending on it.
pub async fn plan_cascade(
    db: &dyn DbExecutor,
    schema: &Schema,
    instance: &Instance,
    options: DeleteOptions,
) -> TesseraResult<DeletePlan> {
    let target = schema.require(instance.table())?;
    let pk = instance.pk().cloned().ok_or_else(|| {
        TesseraError::SchemaError(format!(
            "Cannot delete an unsaved '{}' instance",
            instance.table()
        ))
    })?;
    let target_pk = target.primary_key()?.name.clone();

    if !options.recursive {
        return Ok(DeletePlan {
            nullify: Vec::new(),
            deletes: vec![DeleteStep {
                table: target.name.clone(),
                pk_column: target_pk,
                pks: vec![pk],
            }],
        });
    }

    let compiler = SqlCompiler::new(db.backend_type());

    // Tables in discovery order, with their collected rows.
    let mut order: Vec<String> = vec![target.name.clone()];
    let mut collected: HashMap<String, Collected> = HashMap::new();
    collected
        .entry(target.name.clone())
        .or_insert_with(|| Collected {
            pk_column: target_pk.clone(),
            ..Collected::default()
        })
        .add(vec![pk], 0);

    let mut nullify: Vec<(String, String, Collected)> = Vec::new();
    let mut delete_edges: Vec<(String, String)> = Vec::new();
    let mut queue: VecDeque<(String, Vec<Value>, usize)> = VecDeque::new();
    if let Some(c) = collected.get(&target.name) {
        queue.push_back((target.name.clone(), c.rows.iter().map(|(v, _)| v.clone()).collect(), 0));
    }

    while let Some((table_name, pks, depth)) = queue.pop_front() {
        let table = schema.require(&table_name)?;
        let table_pk = table.primary_key()?.name.clone();

        for edge in schema.dependents_of(&table_name) {
            let dependent = schema.require(&edge.table)?;
            let dependent_pk = dependent.primary_key()?.name.clone();

            let referenced = if edge.referenced_column == table_pk {
                pks.clone()
            } else {
                select_in(db, compiler, &table_name, &edge.referenced_column, &table_pk, &pks)
                    .await?
            };
            if referenced.is_empty() {
                continue;
            }

            let dependent_pks =
                select_in(db, compiler, &edge.table, &dependent_pk, &edge.column, &referenced)
                    .await?;
            if dependent_pks.is_empty() {
                continue;
            }

            if edge.nullable && !options.delete_nullable {
                let pos = match nullify
                    .iter()
                    .position(|(t, c, _)| *t == edge.table && *c == edge.column)
                {
                    Some(pos) => pos,
                    None => {
                        nullify.push((
                            edge.table.clone(),
                            edge.column.clone(),
                            Collected {
                                pk_column: dependent_pk.clone(),
                                ..Collected::default()
                            },
                        ));
                        nullify.len() - 1
                    }
                };
                nullify[pos].2.add(dependent_pks, depth + 1);
                continue;
            }

            if !delete_edges.contains(&(edge.table.clone(), table_name.clone())) {
                delete_edges.push((edge.table.clone(), table_name.clone()));
            }
            let entry = collected.entry(edge.table.clone()).or_insert_with(|| {
                order.push(edge.table.clone());
                Collected {
                    pk_column: dependent_pk.clone(),
                    ..Collected::default()
                }
            });
            let fresh = entry.add(dependent_pks, depth + 1);
            if !fresh.is_empty() {
                queue.push_back((edge.table.clone(), fresh, depth + 1));
            }
        }
    }

    let mut graph = DependencyGraph::new();
    for name in &order {
        graph.add_table(name);
    }
    for (dependent, dependency) in &delete_edges {
        graph.add_dependency(dependent, dependency);
    }
    let creation: Vec<String> = graph
        .topological_order()?
        .into_iter()
        .map(str::to_string)
        .collect();

    let deletes = creation
        .into_iter()
        .rev()
        .filter_map(|name| {
            collected.remove(&name).map(|c| DeleteStep {
                table: name,
                pk_column: c.pk_column.clone(),
                pks: c.into_delete_order(),
            })
        })
        .collect();

    let nullify = nullify
        .into_iter()
        .map(|(table, column, c)| NullifyStep {
            table,
            column,
            pk_column: c.pk_column.clone(),
            pks: c.into_delete_order(),
        })
        .collect();

    Ok(DeletePlan { nullify, deletes })
}

/// Deletes `instance` according to `options` and reports what was removed.
///
/// This does not open a transaction; wrap it in one for atomicity.
pub async fn cascade_delete(
    db: &dyn DbExecutor,
    schema: &Schema,
    instance: &Instance,
    options: DeleteOptions,
) -> TesseraResult<CascadeReport> {
    let plan = plan_cascade(db, schema, instance, options).await?;
    let report = plan.execute(db).await?;
    info!(
        table = instance.table(),
        recursive = options.recursive,
        deleted = report.total_deleted(),
        nullified = report.total_nullified(),
        "Deleted instance"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::MockDb;
    use crate::row::Row;
    use crate::schema::{ColumnDef, ColumnType, TableDef};

    fn ids(column: &str, ids: &[i64]) -> Vec<Row> {
        ids.iter()
            .map(|&i| Row::new(vec![column.to_string()], vec![Value::Int(i)]))
            .collect()
    }

    fn blog_schema() -> Schema {
        let mut schema = Schema::new();
        schema
            .register(TableDef::with_auto_id("user").column(ColumnDef::new("username", ColumnType::Text)))
            .unwrap();
        schema
            .register(TableDef::with_auto_id("tweet").column(ColumnDef::foreign_key("user_id", "user")))
            .unwrap();
        schema
            .register(
                TableDef::with_auto_id("favorite")
                    .column(ColumnDef::foreign_key("tweet_id", "tweet"))
                    .column(ColumnDef::foreign_key("user_id", "user").null()),
            )
            .unwrap();
        schema
    }

    fn persisted(schema: &Schema, table: &str, pk: i64) -> Instance {
        let row = Row::new(vec!["id".into()], vec![Value::Int(pk)]);
        Instance::from_row(schema.require(table).unwrap(), row).unwrap()
    }

    #[tokio::test]
    async fn test_non_recursive_plan_is_single_delete() {
        let schema = blog_schema();
        let db = MockDb::sqlite();
        let user = persisted(&schema, "user", 1);
        let plan = plan_cascade(&db, &schema, &user, DeleteOptions::single())
            .await
            .unwrap();
        assert!(plan.nullify_steps().is_empty());
        assert_eq!(plan.delete_steps().len(), 1);
        assert!(db.statements().await.is_empty());

        let report = plan.execute(&db).await.unwrap();
        assert_eq!(db.statements().await, vec!["DELETE FROM \"user\" WHERE \"id\" IN (?)"]);
        assert_eq!(report.total_deleted(), 1);
    }

    #[tokio::test]
    async fn test_recursive_plan_orders_dependents_first_and_nullifies() {
        let schema = blog_schema();
        let db = MockDb::sqlite();
        // user 1 -> tweets 10, 11; favorites via tweet: 100; favorites via user (nullable): 101
        db.push_result(ids("id", &[10, 11])).await; // tweet.user_id IN (1)
        db.push_result(ids("id", &[101])).await; // favorite.user_id IN (1)
        db.push_result(ids("id", &[100])).await; // favorite.tweet_id IN (10, 11)

        let user = persisted(&schema, "user", 1);
        let plan = plan_cascade(&db, &schema, &user, DeleteOptions::recursive())
            .await
            .unwrap();

        let tables: Vec<&str> = plan.delete_steps().iter().map(|s| s.table.as_str()).collect();
        assert_eq!(tables, vec!["favorite", "tweet", "user"]);
        assert_eq!(plan.delete_steps()[1].pks, vec![Value::Int(10), Value::Int(11)]);

        let nullify = &plan.nullify_steps()[0];
        assert_eq!(nullify.table, "favorite");
        assert_eq!(nullify.column, "user_id");
        assert_eq!(nullify.pks, vec![Value::Int(101)]);

        let stmts = db.statements().await;
        assert_eq!(
            stmts,
            vec![
                "SELECT \"id\" FROM \"tweet\" WHERE \"user_id\" IN (?)",
                "SELECT \"id\" FROM \"favorite\" WHERE \"user_id\" IN (?)",
                "SELECT \"id\" FROM \"favorite\" WHERE \"tweet_id\" IN (?, ?)",
            ]
        );
    }

    #[tokio::test]
    async fn test_delete_nullable_descends() {
        let schema = blog_schema();
        let db = MockDb::sqlite();
        db.push_result(ids("id", &[])).await; // tweet.user_id
        db.push_result(ids("id", &[101])).await; // favorite.user_id

        let user = persisted(&schema, "user", 1);
        let plan = plan_cascade(
            &db,
            &schema,
            &user,
            DeleteOptions::recursive().with_delete_nullable(true),
        )
        .await
        .unwrap();
        assert!(plan.nullify_steps().is_empty());
        let tables: Vec<&str> = plan.delete_steps().iter().map(|s| s.table.as_str()).collect();
        assert_eq!(tables, vec!["favorite", "user"]);
    }

    #[tokio::test]
    async fn test_self_reference_deepest_first() {
        let mut schema = Schema::new();
        schema
            .register(
                TableDef::with_auto_id("category")
                    .column(ColumnDef::foreign_key("parent_id", "category")),
            )
            .unwrap();
        let db = MockDb::sqlite();
        db.push_result(ids("id", &[2, 3])).await; // children of 1
        db.push_result(ids("id", &[4])).await; // children of 2, 3
        db.push_result(ids("id", &[])).await; // children of 4

        let root = persisted(&schema, "category", 1);
        let plan = plan_cascade(&db, &schema, &root, DeleteOptions::recursive())
            .await
            .unwrap();
        assert_eq!(plan.delete_steps().len(), 1);
        assert_eq!(
            plan.delete_steps()[0].pks,
            vec![Value::Int(4), Value::Int(2), Value::Int(3), Value::Int(1)]
        );
    }

    #[tokio::test]
    async fn test_non_pk_reference_selects_referenced_column() {
        let mut schema = Schema::new();
        schema
            .register(TableDef::with_auto_id("dia").column(ColumnDef::new("a", ColumnType::Text).unique()))
            .unwrap();
        schema
            .register(
                TableDef::with_auto_id("diba")
                    .column(ColumnDef::new("a_id", ColumnType::Text).references("dia", "a")),
            )
            .unwrap();
        let db = MockDb::sqlite();
        db.push_result(vec![Row::new(vec!["a".into()], vec![Value::from("a2")])])
            .await;
        db.push_result(ids("id", &[7])).await;

        let a = persisted(&schema, "dia", 2);
        let plan = plan_cascade(&db, &schema, &a, DeleteOptions::recursive())
            .await
            .unwrap();
        assert_eq!(
            db.statements().await,
            vec![
                "SELECT \"a\" FROM \"dia\" WHERE \"id\" IN (?)",
                "SELECT \"id\" FROM \"diba\" WHERE \"a_id\" IN (?)",
            ]
        );
        assert_eq!(db.params().await[1], vec![Value::from("a2")]);
        assert_eq!(plan.delete_steps()[0].table, "diba");
    }

    #[tokio::test]
    async fn test_cycle_fails_before_deleting() {
        let mut schema = Schema::new();
        schema
            .register(TableDef::with_auto_id("a").column(ColumnDef::foreign_key("b_id", "b")))
            .unwrap();
        schema
            .register(TableDef::with_auto_id("b").column(ColumnDef::foreign_key("a_id", "a")))
            .unwrap();
        let db = MockDb::sqlite();
        db.push_result(ids("id", &[5])).await; // b.a_id IN (1)
        db.push_result(ids("id", &[1])).await; // a.b_id IN (5)

        let a = persisted(&schema, "a", 1);
        let err = cascade_delete(&db, &schema, &a, DeleteOptions::recursive())
            .await
            .unwrap_err();
        assert!(matches!(err, TesseraError::CycleError { .. }));
        assert!(db
            .statements()
            .await
            .iter()
            .all(|s| s.starts_with("SELECT")));
    }

    #[tokio::test]
    async fn test_unsaved_instance_rejected() {
        let schema = blog_schema();
        let db = MockDb::sqlite();
        let unsaved = Instance::new(schema.require("user").unwrap()).unwrap();
        let err = plan_cascade(&db, &schema, &unsaved, DeleteOptions::recursive())
            .await
            .unwrap_err();
        assert!(matches!(err, TesseraError::SchemaError(_)));
    }

    #[tokio::test]
    async fn test_execute_chunks_large_in_lists() {
        let plan = DeletePlan {
            nullify: Vec::new(),
            deletes: vec![DeleteStep {
                table: "tweet".into(),
                pk_column: "id".into(),
                pks: (0..1_200).map(Value::Int).collect(),
            }],
        };
        let db = MockDb::sqlite();
        let report = plan.execute(&db).await.unwrap();
        let params = db.params().await;
        assert_eq!(params.len(), 3);
        assert_eq!(params[0].len(), IN_CHUNK_SIZE);
        assert_eq!(params[2].len(), 200);
        // MockDb reports one affected row per statement.
        assert_eq!(report.deleted("tweet"), 3);
    }

    #[test]
    fn test_report_accessors() {
        let mut report = CascadeReport::default();
        report.entry("tweet").deleted += 2;
        report.entry("favorite").nullified += 1;
        report.entry("user").deleted += 1;
        assert_eq!(report.total_deleted(), 3);
        assert_eq!(report.total_nullified(), 1);
        assert_eq!(report.deleted("nope"), 0);
        assert_eq!(report.tables()[0].0, "tweet");
    }
}
