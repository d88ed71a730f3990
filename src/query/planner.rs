use super::parser::{AggregateFunction, Condition, ParsedQuery, Projection};

/// Query execution plan
#[derive(Debug)]
pub struct QueryPlan {
    /// Table name to query
    pub table: String,
    /// Column filters
    pub filters: Vec<FilterPlan>,
    /// Columns referenced anywhere in the query, checked against the schema
    pub required_columns: Vec<String>,
    /// Projection plan
    pub projections: Vec<ProjectionPlan>,
    /// Group by columns
    pub group_by: Vec<String>,
    /// Order by plan
    pub order_by: Vec<OrderByPlan>,
}

#[derive(Debug, Clone)]
pub struct FilterPlan {
    pub column: String,
    pub condition: Condition,
}

#[derive(Debug, Clone)]
pub enum ProjectionPlan {
    /// Pass through a column value
    Column { name: String, output_name: String },
    /// Compute an aggregation
    Aggregate {
        function: AggregateFunction,
        column: Option<String>,
        output_name: String,
    },
}

#[derive(Debug, Clone)]
pub struct OrderByPlan {
    pub column: String,
    pub descending: bool,
}

/// Create an execution plan from a parsed query
pub fn plan_query(query: ParsedQuery) -> Result<QueryPlan, PlanError> {
    let mut required_columns: Vec<String> = Vec::new();
    let mut require = |name: &str| {
        if !required_columns.iter().any(|c| c == name) {
            required_columns.push(name.to_string());
        }
    };

    let filters = query
        .filters
        .iter()
        .map(|filter| {
            require(&filter.column);
            FilterPlan {
                column: filter.column.clone(),
                condition: filter.condition.clone(),
            }
        })
        .collect();

    let mut projections = Vec::with_capacity(query.projections.len());
    for proj in &query.projections {
        match proj {
            Projection::Column { name, alias } => {
                require(name);
                projections.push(ProjectionPlan::Column {
                    name: name.clone(),
                    output_name: alias.clone().unwrap_or_else(|| name.clone()),
                });
            }
            Projection::Aggregation {
                function,
                column,
                alias,
            } => {
                if let Some(col) = column {
                    require(col);
                }
                let output_name = alias.clone().unwrap_or_else(|| {
                    format!(
                        "{}_{}",
                        format!("{:?}", function).to_lowercase(),
                        column.as_deref().unwrap_or("*")
                    )
                });
                projections.push(ProjectionPlan::Aggregate {
                    function: *function,
                    column: column.clone(),
                    output_name,
                });
            }
        }
    }

    for name in &query.group_by {
        require(name);
    }

    let aggregating = !query.group_by.is_empty()
        || projections
            .iter()
            .any(|p| matches!(p, ProjectionPlan::Aggregate { .. }));

    if aggregating {
        for proj in &projections {
            if let ProjectionPlan::Column { name, .. } = proj {
                if !query.group_by.contains(name) {
                    return Err(PlanError::NotGrouped(name.clone()));
                }
            }
        }
    }

    let order_by = query
        .order_by
        .iter()
        .map(|ob| OrderByPlan {
            column: ob.column.clone(),
            descending: ob.descending,
        })
        .collect();

    Ok(QueryPlan {
        table: query.table,
        filters,
        required_columns,
        projections,
        group_by: query.group_by,
        order_by,
    })
}

/// Check if the plan groups rows
pub fn has_aggregations(plan: &QueryPlan) -> bool {
    !plan.group_by.is_empty()
        || plan
            .projections
            .iter()
            .any(|p| matches!(p, ProjectionPlan::Aggregate { .. }))
}

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("Column '{0}' must appear in GROUP BY or inside an aggregate")]
    NotGrouped(String),
}
