use sqlparser::ast::{
    BinaryOperator, Expr, FunctionArg, FunctionArgExpr, GroupByExpr, ObjectName, OrderByExpr,
    SelectItem, SetExpr, Statement, TableFactor, TableWithJoins, Value as SqlValue,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::data::Value;

/// Parsed query representation
#[derive(Debug, Clone)]
pub struct ParsedQuery {
    /// Table name
    pub table: String,
    /// Selected columns and aggregations
    pub projections: Vec<Projection>,
    /// WHERE conditions, implicitly AND-ed
    pub filters: Vec<Filter>,
    /// GROUP BY columns
    pub group_by: Vec<String>,
    /// ORDER BY clauses
    pub order_by: Vec<OrderBy>,
}

#[derive(Debug, Clone)]
pub enum Projection {
    /// Simple column reference: SELECT col
    Column { name: String, alias: Option<String> },
    /// Aggregation: SELECT COUNT(*), MAX(col)
    Aggregation {
        function: AggregateFunction,
        column: Option<String>, // None for COUNT(*)
        alias: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Max,
}

#[derive(Debug, Clone)]
pub struct Filter {
    pub column: String,
    pub condition: Condition,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    /// Inclusive on both ends
    Between { low: Value, high: Value },
    In(Vec<Value>),
}

#[derive(Debug, Clone)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

/// Parse a SQL query string
pub fn parse_query(sql: &str) -> Result<ParsedQuery, ParseError> {
    let dialect = GenericDialect {};
    let statements = Parser::parse_sql(&dialect, sql)?;

    if statements.is_empty() {
        return Err(ParseError::EmptyQuery);
    }

    if statements.len() > 1 {
        return Err(ParseError::MultipleStatements);
    }

    match &statements[0] {
        Statement::Query(query) => parse_select(query),
        _ => Err(ParseError::UnsupportedStatement),
    }
}

fn parse_select(query: &sqlparser::ast::Query) -> Result<ParsedQuery, ParseError> {
    let select = match &*query.body {
        SetExpr::Select(select) => select,
        _ => return Err(ParseError::UnsupportedQuery("Only SELECT queries supported".into())),
    };

    let table = parse_table_name(&select.from)?;
    let projections = parse_projections(&select.projection)?;
    let filters = parse_where(&select.selection)?;
    let group_by = parse_group_by(&select.group_by)?;
    let order_by = parse_order_by(&query.order_by)?;
    if query.limit.is_some() || query.offset.is_some() {
        return Err(ParseError::UnsupportedQuery("LIMIT and OFFSET".into()));
    }

    Ok(ParsedQuery {
        table,
        projections,
        filters,
        group_by,
        order_by,
    })
}

fn parse_table_name(from: &[TableWithJoins]) -> Result<String, ParseError> {
    if from.is_empty() {
        return Err(ParseError::MissingTable);
    }

    if from.len() > 1 {
        return Err(ParseError::JoinsNotSupported);
    }

    let table = &from[0];
    if !table.joins.is_empty() {
        return Err(ParseError::JoinsNotSupported);
    }

    match &table.relation {
        TableFactor::Table { name, .. } => Ok(object_name_to_string(name)),
        _ => Err(ParseError::UnsupportedTableExpression),
    }
}

fn object_name_to_string(name: &ObjectName) -> String {
    name.0.iter().map(|i| i.value.clone()).collect::<Vec<_>>().join(".")
}

fn parse_projections(items: &[SelectItem]) -> Result<Vec<Projection>, ParseError> {
    let mut projections = Vec::new();

    for item in items {
        match item {
            SelectItem::UnnamedExpr(expr) => {
                projections.push(parse_projection_expr(expr, None)?);
            }
            SelectItem::ExprWithAlias { expr, alias } => {
                projections.push(parse_projection_expr(expr, Some(alias.value.clone()))?);
            }
            _ => return Err(ParseError::UnsupportedProjection),
        }
    }

    Ok(projections)
}

fn parse_projection_expr(expr: &Expr, alias: Option<String>) -> Result<Projection, ParseError> {
    match expr {
        Expr::Identifier(_) | Expr::CompoundIdentifier(_) => Ok(Projection::Column {
            name: extract_column_name(expr)?,
            alias,
        }),

        Expr::Function(func) => {
            let func_name = func.name.to_string().to_uppercase();
            let function = match func_name.as_str() {
                "COUNT" => AggregateFunction::Count,
                "MAX" => AggregateFunction::Max,
                _ => return Err(ParseError::UnsupportedFunction(func_name)),
            };

            let column = parse_function_column_arg(&func.args)?;
            if column.is_none() && function != AggregateFunction::Count {
                return Err(ParseError::UnsupportedExpression(format!(
                    "{}(*)",
                    func_name
                )));
            }

            Ok(Projection::Aggregation {
                function,
                column,
                alias,
            })
        }

        _ => Err(ParseError::UnsupportedExpression(format!("{:?}", expr))),
    }
}

fn parse_function_column_arg(args: &[FunctionArg]) -> Result<Option<String>, ParseError> {
    if args.is_empty() {
        return Ok(None);
    }

    match &args[0] {
        FunctionArg::Unnamed(FunctionArgExpr::Wildcard) => Ok(None),
        FunctionArg::Unnamed(FunctionArgExpr::Expr(expr)) => {
            extract_column_name(expr).map(Some).map_err(|_| {
                ParseError::UnsupportedExpression("Complex function argument".into())
            })
        }
        _ => Err(ParseError::UnsupportedExpression("Complex function argument".into())),
    }
}

fn parse_where(selection: &Option<Expr>) -> Result<Vec<Filter>, ParseError> {
    let Some(expr) = selection else {
        return Ok(vec![]);
    };

    parse_filter_expr(expr)
}

fn parse_filter_expr(expr: &Expr) -> Result<Vec<Filter>, ParseError> {
    match expr {
        Expr::BinaryOp { left, op, right } => match op {
            BinaryOperator::And => {
                let mut filters = parse_filter_expr(left)?;
                filters.extend(parse_filter_expr(right)?);
                Ok(filters)
            }
            BinaryOperator::Eq => Ok(vec![Filter {
                column: extract_column_name(left)?,
                condition: Condition::Eq(extract_value(right)?),
            }]),
            _ => Err(ParseError::UnsupportedOperator(format!("{:?}", op))),
        },
        Expr::Between {
            expr,
            negated: false,
            low,
            high,
        } => Ok(vec![Filter {
            column: extract_column_name(expr)?,
            condition: Condition::Between {
                low: extract_value(low)?,
                high: extract_value(high)?,
            },
        }]),
        Expr::InList {
            expr,
            list,
            negated: false,
        } => {
            let values = list.iter().map(extract_value).collect::<Result<Vec<_>, _>>()?;
            Ok(vec![Filter {
                column: extract_column_name(expr)?,
                condition: Condition::In(values),
            }])
        }
        Expr::Nested(inner) => parse_filter_expr(inner),
        _ => Err(ParseError::UnsupportedExpression(format!("{:?}", expr))),
    }
}

fn extract_column_name(expr: &Expr) -> Result<String, ParseError> {
    match expr {
        Expr::Identifier(ident) => Ok(ident.value.clone()),
        Expr::CompoundIdentifier(idents) => {
            Ok(idents.iter().map(|i| i.value.clone()).collect::<Vec<_>>().join("."))
        }
        _ => Err(ParseError::ExpectedColumnName),
    }
}

fn extract_value(expr: &Expr) -> Result<Value, ParseError> {
    match expr {
        Expr::Value(v) => sql_value_to_value(v),
        _ => Err(ParseError::ExpectedValue),
    }
}

fn sql_value_to_value(v: &SqlValue) -> Result<Value, ParseError> {
    match v {
        SqlValue::Number(n, _) => {
            if let Ok(i) = n.parse::<i64>() {
                Ok(Value::Int64(i))
            } else if let Ok(f) = n.parse::<f64>() {
                Ok(Value::Float64(f))
            } else {
                Err(ParseError::InvalidNumber(n.clone()))
            }
        }
        SqlValue::SingleQuotedString(s) => Ok(Value::String(s.clone())),
        SqlValue::Boolean(b) => Ok(Value::Bool(*b)),
        SqlValue::Null => Ok(Value::Null),
        _ => Err(ParseError::UnsupportedValue),
    }
}

fn parse_group_by(group_by: &GroupByExpr) -> Result<Vec<String>, ParseError> {
    let exprs = match group_by {
        GroupByExpr::All => return Err(ParseError::UnsupportedExpression("GROUP BY ALL".into())),
        GroupByExpr::Expressions(exprs) => exprs,
    };

    exprs
        .iter()
        .map(|expr| {
            extract_column_name(expr).map_err(|_| ParseError::UnsupportedGroupByExpression)
        })
        .collect()
}

fn parse_order_by(order_by: &[OrderByExpr]) -> Result<Vec<OrderBy>, ParseError> {
    let mut result = Vec::new();

    for expr in order_by {
        let column = extract_column_name(&expr.expr)
            .map_err(|_| ParseError::UnsupportedOrderByExpression)?;
        let descending = expr.asc.map(|asc| !asc).unwrap_or(false);

        result.push(OrderBy { column, descending });
    }

    Ok(result)
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("SQL parse error: {0}")]
    SqlParser(#[from] sqlparser::parser::ParserError),

    #[error("Empty query")]
    EmptyQuery,

    #[error("Multiple statements not supported")]
    MultipleStatements,

    #[error("Unsupported statement type")]
    UnsupportedStatement,

    #[error("Unsupported query: {0}")]
    UnsupportedQuery(String),

    #[error("Missing FROM table")]
    MissingTable,

    #[error("JOINs are not supported")]
    JoinsNotSupported,

    #[error("Unsupported table expression")]
    UnsupportedTableExpression,

    #[error("Unsupported projection")]
    UnsupportedProjection,

    #[error("Unsupported function: {0}")]
    UnsupportedFunction(String),

    #[error("Unsupported expression: {0}")]
    UnsupportedExpression(String),

    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("Expected column name")]
    ExpectedColumnName,

    #[error("Expected value")]
    ExpectedValue,

    #[error("Invalid number: {0}")]
    InvalidNumber(String),

    #[error("Unsupported value type")]
    UnsupportedValue,

    #[error("Unsupported GROUP BY expression")]
    UnsupportedGroupByExpression,

    #[error("Unsupported ORDER BY expression")]
    UnsupportedOrderByExpression,
}
