//! Dependency ordering of tables.
//!
//! Tables form a directed graph through their foreign keys. Creating them
//! requires every referenced table to exist first; dropping them, or
//! deleting rows across them, requires the reverse.
//!
//! [`DependencyGraph`] runs Kahn's algorithm with a min-heap keyed on
//! insertion position, so among tables whose dependencies are satisfied the
//! earliest one in the input always comes next. Self-edges are ignored (a
//! table can reference itself inside its own `CREATE TABLE`) and so are
//! edges to tables outside the graph.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use tessera_core::{TesseraError, TesseraResult};

use crate::schema::TableDef;

/// A dependency graph over table names.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    names: Vec<String>,
    index: HashMap<String, usize>,
    /// `dependencies[n]`: nodes that must precede `n`.
    dependencies: Vec<Vec<usize>>,
    /// `dependents[n]`: nodes that must follow `n`.
    dependents: Vec<Vec<usize>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the graph of `tables` over all of their foreign keys.
    pub fn from_tables(tables: &[TableDef]) -> Self {
        let mut graph = Self::new();
        for table in tables {
            graph.add_table(&table.name);
        }
        for table in tables {
            for (_, fk) in table.foreign_keys() {
                graph.add_dependency(&table.name, &fk.table);
            }
        }
        graph
    }

    /// Adds a node. Adding an existing name is a no-op.
    pub fn add_table(&mut self, name: &str) {
        if self.index.contains_key(name) {
            return;
        }
        self.index.insert(name.to_string(), self.names.len());
        self.names.push(name.to_string());
        self.dependencies.push(Vec::new());
        self.dependents.push(Vec::new());
    }

    /// Records that `dependent` must come after `dependency`.
    ///
    /// Returns `false` when the edge is ignored: a self-edge, or either end
    /// is not in the graph.
    pub fn add_dependency(&mut self, dependent: &str, dependency: &str) -> bool {
        if dependent == dependency {
            return false;
        }
        let (Some(&from), Some(&to)) = (self.index.get(dependent), self.index.get(dependency))
        else {
            return false;
        };
        if !self.dependencies[from].contains(&to) {
            self.dependencies[from].push(to);
            self.dependents[to].push(from);
        }
        true
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Returns the names with every dependency before its dependents.
    ///
    /// Fails with `CycleError` naming the tables on a cycle.
    pub fn topological_order(&self) -> TesseraResult<Vec<&str>> {
        let mut in_degree: Vec<usize> = self.dependencies.iter().map(Vec::len).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(n, _)| Reverse(n))
            .collect();

        let mut order = Vec::with_capacity(self.names.len());
        while let Some(Reverse(node)) = ready.pop() {
            order.push(node);
            for &child in &self.dependents[node] {
                in_degree[child] -= 1;
                if in_degree[child] == 0 {
                    ready.push(Reverse(child));
                }
            }
        }

        if order.len() != self.names.len() {
            return Err(TesseraError::CycleError {
                tables: self.cycle_members(&in_degree),
            });
        }

        Ok(order.into_iter().map(|n| self.names[n].as_str()).collect())
    }

    /// Narrows the unordered remainder down to the nodes on cycles by
    /// repeatedly discarding nodes nothing else in the remainder depends on.
    fn cycle_members(&self, in_degree: &[usize]) -> Vec<String> {
        let mut remaining: Vec<bool> = in_degree.iter().map(|&d| d > 0).collect();
        loop {
            let mut changed = false;
            for node in 0..remaining.len() {
                if remaining[node] && !self.dependents[node].iter().any(|&c| remaining[c]) {
                    remaining[node] = false;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        let mut names: Vec<String> = remaining
            .iter()
            .enumerate()
            .filter(|(_, &r)| r)
            .map(|(n, _)| self.names[n].clone())
            .collect();
        names.sort();
        names
    }
}

/// Orders tables so every referenced table precedes the tables referencing it.
///
/// Ties keep input order. Foreign keys to tables outside `tables` are
/// assumed to point at existing tables and are ignored. Two definitions
/// sharing a name are a `SchemaError`.
///
/// # Examples
///
/// ```
/// use tessera_db::resolver::order_for_creation;
/// use tessera_db::schema::{ColumnDef, TableDef};
///
/// let tweet = TableDef::with_auto_id("tweet").column(ColumnDef::foreign_key("user_id", "user"));
/// let user = TableDef::with_auto_id("user");
/// let tables = [tweet, user];
///
/// let names: Vec<&str> = order_for_creation(&tables)
///     .unwrap()
///     .into_iter()
///     .map(|t| t.name.as_str())
///     .collect();
/// assert_eq!(names, vec!["user", "tweet"]);
/// ```
pub fn order_for_creation(tables: &[TableDef]) -> TesseraResult<Vec<&TableDef>> {
    let mut by_name: HashMap<&str, &TableDef> = HashMap::with_capacity(tables.len());
    for table in tables {
        if by_name.insert(table.name.as_str(), table).is_some() {
            return Err(TesseraError::SchemaError(format!(
                "Duplicate table '{}'",
                table.name
            )));
        }
    }
    let graph = DependencyGraph::from_tables(tables);
    Ok(graph
        .topological_order()?
        .into_iter()
        .filter_map(|name| by_name.get(name).copied())
        .collect())
}

/// The reverse of [`order_for_creation`]: dependents first.
pub fn order_for_drop(tables: &[TableDef]) -> TesseraResult<Vec<&TableDef>> {
    let mut order = order_for_creation(tables)?;
    order.reverse();
    Ok(order)
}
