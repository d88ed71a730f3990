use super::parser::AggregateFunction;
use crate::data::Value;

/// Running state for one aggregate in one group
#[derive(Debug, Clone)]
pub enum Accumulator {
    /// COUNT(*) counts every row, COUNT(col) skips NULLs
    Count { count: i64, count_nulls: bool },
    Max(Option<Value>),
}

impl Accumulator {
    pub fn new(func: AggregateFunction, column: &Option<String>) -> Self {
        match func {
            AggregateFunction::Count => Accumulator::Count {
                count: 0,
                count_nulls: column.is_none(),
            },
            AggregateFunction::Max => Accumulator::Max(None),
        }
    }

    /// Add a value to the accumulator
    pub fn accumulate(&mut self, value: &Value) {
        match self {
            Accumulator::Count { count, count_nulls } => {
                if *count_nulls || !value.is_null() {
                    *count += 1;
                }
            }
            Accumulator::Max(current) => {
                if !value.is_null() && current.as_ref().map_or(true, |c| value > c) {
                    *current = Some(value.clone());
                }
            }
        }
    }

    /// Get the final result
    pub fn result(&self) -> Value {
        match self {
            Accumulator::Count { count, .. } => Value::Int64(*count),
            Accumulator::Max(v) => v.clone().unwrap_or(Value::Null),
        }
    }
}
