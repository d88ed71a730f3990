use super::aggregates::Accumulator;
use super::parser::Condition;
use super::planner::{has_aggregations, FilterPlan, OrderByPlan, ProjectionPlan, QueryPlan};
use crate::data::{Row, Value};
use crate::storage::StorageEngine;
use std::collections::{BTreeMap, HashMap};

/// Query execution result
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueryResult {
    /// Column names
    pub columns: Vec<String>,
    /// Result rows
    pub rows: Vec<Vec<Value>>,
    /// Number of rows scanned
    pub rows_scanned: usize,
    /// Execution time in milliseconds
    pub execution_time_ms: u64,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Position of an output column
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Value at (row, column name)
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }
}

/// Execute a query plan against the storage engine
pub fn execute_query(engine: &StorageEngine, plan: &QueryPlan) -> Result<QueryResult, ExecuteError> {
    let start = std::time::Instant::now();

    let table = engine
        .get_table(&plan.table)
        .ok_or_else(|| ExecuteError::TableNotFound(plan.table.clone()))?;

    if let Some(missing) = plan
        .required_columns
        .iter()
        .find(|c| table.schema.column(c).is_none())
    {
        return Err(ExecuteError::ColumnNotFound(missing.clone()));
    }

    let projections = &plan.projections;
    let columns: Vec<String> = projections
        .iter()
        .map(|p| match p {
            ProjectionPlan::Column { output_name, .. }
            | ProjectionPlan::Aggregate { output_name, .. } => output_name.clone(),
        })
        .collect();

    let (mut rows, rows_scanned) = {
        let stored = table.read();
        let matching = stored
            .values()
            .filter(|row| passes_filters(row, &plan.filters));

        let rows = if has_aggregations(plan) {
            execute_aggregation(matching, plan, projections)
        } else {
            execute_scan(matching, projections)
        };
        (rows, stored.len())
    };

    if !plan.order_by.is_empty() {
        apply_order_by(&mut rows, &columns, &plan.order_by)?;
    }

    Ok(QueryResult {
        columns,
        rows,
        rows_scanned,
        execution_time_ms: start.elapsed().as_millis() as u64,
    })
}

/// Execute a simple scan (no aggregation)
fn execute_scan<'a>(
    rows: impl Iterator<Item = &'a Row>,
    projections: &[ProjectionPlan],
) -> Vec<Vec<Value>> {
    rows.map(|row| {
        projections
            .iter()
            .map(|p| match p {
                ProjectionPlan::Column { name, .. } => lookup(row, name),
                _ => Value::Null,
            })
            .collect()
    })
    .collect()
}

/// Execute an aggregation query
fn execute_aggregation<'a>(
    rows: impl Iterator<Item = &'a Row>,
    plan: &QueryPlan,
    projections: &[ProjectionPlan],
) -> Vec<Vec<Value>> {
    let new_accumulators = || -> Vec<Accumulator> {
        projections
            .iter()
            .filter_map(|p| match p {
                ProjectionPlan::Aggregate {
                    function, column, ..
                } => Some(Accumulator::new(*function, column)),
                _ => None,
            })
            .collect()
    };

    // Group key -> accumulators, ordered by key for stable output
    let mut groups: BTreeMap<Vec<Value>, Vec<Accumulator>> = BTreeMap::new();

    for row in rows {
        let group_key: Vec<Value> = plan.group_by.iter().map(|c| lookup(row, c)).collect();
        let accumulators = groups.entry(group_key).or_insert_with(new_accumulators);

        let aggregates = projections.iter().filter_map(|p| match p {
            ProjectionPlan::Aggregate { column, .. } => Some(column),
            _ => None,
        });
        for (acc, column) in accumulators.iter_mut().zip(aggregates) {
            let value = match column {
                Some(col) => lookup(row, col),
                None => Value::Int64(1),
            };
            acc.accumulate(&value);
        }
    }

    // A global aggregate over zero rows still yields one row
    if groups.is_empty() && plan.group_by.is_empty() {
        groups.insert(Vec::new(), new_accumulators());
    }

    groups
        .into_iter()
        .map(|(group_values, accumulators)| {
            let mut accumulators = accumulators.into_iter();
            projections
                .iter()
                .map(|proj| match proj {
                    ProjectionPlan::Column { name, .. } => plan
                        .group_by
                        .iter()
                        .position(|g| g == name)
                        .and_then(|i| group_values.get(i).cloned())
                        .unwrap_or(Value::Null),
                    ProjectionPlan::Aggregate { .. } => accumulators
                        .next()
                        .map(|acc| acc.result())
                        .unwrap_or(Value::Null),
                })
                .collect()
        })
        .collect()
}

fn lookup(row: &Row, column: &str) -> Value {
    row.get(column).cloned().unwrap_or(Value::Null)
}

fn passes_filters(row: &Row, filters: &[FilterPlan]) -> bool {
    filters.iter().all(|filter| {
        let value = row.get(&filter.column).unwrap_or(&Value::Null);

        // NULL never satisfies a predicate
        if value.is_null() {
            return false;
        }

        match &filter.condition {
            Condition::Eq(rhs) => value == rhs,
            Condition::Between { low, high } => value >= low && value <= high,
            Condition::In(list) => list.contains(value),
        }
    })
}

fn apply_order_by(
    rows: &mut [Vec<Value>],
    columns: &[String],
    order_by: &[OrderByPlan],
) -> Result<(), ExecuteError> {
    let col_indices: HashMap<&str, usize> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| (c.as_str(), i))
        .collect();

    let keys = order_by
        .iter()
        .map(|ob| {
            col_indices
                .get(ob.column.as_str())
                .map(|&idx| (idx, ob.descending))
                .ok_or_else(|| ExecuteError::ColumnNotFound(ob.column.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    rows.sort_by(|a, b| {
        for &(idx, descending) in &keys {
            let cmp = a[idx].cmp(&b[idx]);
            if cmp != std::cmp::Ordering::Equal {
                return if descending { cmp.reverse() } else { cmp };
            }
        }
        std::cmp::Ordering::Equal
    });

    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Column '{0}' not found")]
    ColumnNotFound(String),
}
